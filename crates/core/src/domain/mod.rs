pub mod forecast;
pub mod projection;
