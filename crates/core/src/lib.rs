pub mod capture;
pub mod domain;
pub mod forecast;
pub mod time;
pub mod workbook;

pub mod config {
    use anyhow::Context;
    use std::path::PathBuf;

    pub const DEFAULT_BASE_URL: &str = "https://api.weather.com";
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
    pub const DEFAULT_UNITS: &str = "e";
    pub const DEFAULT_LANGUAGE: &str = "en-US";
    pub const DEFAULT_WORKBOOK_PATH: &str = "weather_forecast_capture.xlsx";

    pub const DEFAULT_AIRPORTS: [&str; 18] = [
        "BOM", "DEL", "CCU", "MAA", "GOI", "COK", "AMD", "LHR", "LGW", "SYD", "MEL", "HKG",
        "HND", "ICN", "FRA", "PNQ", "HKT", "BKK",
    ];

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub weather_api_key: Option<String>,
        pub weather_api_base_url: String,
        pub weather_api_timeout_secs: u64,
        pub weather_units: String,
        pub weather_language: String,
        pub airports: Vec<String>,
        pub workbook_path: PathBuf,
        pub sentry_dsn: Option<String>,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                weather_api_key: None,
                weather_api_base_url: DEFAULT_BASE_URL.to_string(),
                weather_api_timeout_secs: DEFAULT_TIMEOUT_SECS,
                weather_units: DEFAULT_UNITS.to_string(),
                weather_language: DEFAULT_LANGUAGE.to_string(),
                airports: DEFAULT_AIRPORTS.iter().map(|s| s.to_string()).collect(),
                workbook_path: PathBuf::from(DEFAULT_WORKBOOK_PATH),
                sentry_dsn: None,
            }
        }
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let mut out = Self::default();

            out.weather_api_key = non_empty_var("WEATHER_API_KEY");
            out.sentry_dsn = non_empty_var("SENTRY_DSN");

            if let Some(s) = non_empty_var("WEATHER_API_BASE_URL") {
                out.weather_api_base_url = s;
            }
            if let Some(s) = non_empty_var("WEATHER_API_TIMEOUT_SECS") {
                out.weather_api_timeout_secs = s
                    .parse::<u64>()
                    .with_context(|| format!("WEATHER_API_TIMEOUT_SECS is not a number: {s}"))?;
            }
            if let Some(s) = non_empty_var("WEATHER_UNITS") {
                out.weather_units = s;
            }
            if let Some(s) = non_empty_var("WEATHER_LANGUAGE") {
                out.weather_language = s;
            }
            if let Some(s) = non_empty_var("FORECAST_AIRPORTS") {
                out.airports = parse_airports(&s)?;
            }
            if let Some(s) = non_empty_var("FORECAST_WORKBOOK_PATH") {
                out.workbook_path = PathBuf::from(s);
            }

            Ok(out)
        }

        pub fn require_weather_api_key(&self) -> anyhow::Result<&str> {
            self.weather_api_key
                .as_deref()
                .context("WEATHER_API_KEY is required")
        }
    }

    /// Splits a comma-separated airport list, trimming blanks and upper-casing codes.
    pub fn parse_airports(s: &str) -> anyhow::Result<Vec<String>> {
        let airports: Vec<String> = s
            .split(',')
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .map(|part| part.to_ascii_uppercase())
            .collect();
        anyhow::ensure!(!airports.is_empty(), "airport list must be non-empty");
        Ok(airports)
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|s| !s.trim().is_empty())
    }

}
