pub mod error;
pub mod provider;
pub mod types;

pub use provider::{ForecastProvider, HourlyForecastClient};
