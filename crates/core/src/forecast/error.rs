use std::fmt;

const MAX_BODY_CHARS: usize = 512;

/// Non-success HTTP status from the forecast provider for one airport.
#[derive(Debug, Clone)]
pub struct ForecastHttpError {
    pub airport: String,
    pub status: u16,
    pub body: String,
}

impl ForecastHttpError {
    pub fn new(airport: &str, status: u16, body: &str) -> Self {
        Self {
            airport: airport.to_string(),
            status,
            body: body.chars().take(MAX_BODY_CHARS).collect(),
        }
    }
}

impl fmt::Display for ForecastHttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "forecast provider HTTP {} (airport={}): {}",
            self.status, self.airport, self.body
        )
    }
}

impl std::error::Error for ForecastHttpError {}
