use crate::config::Settings;
use crate::domain::forecast::ForecastTable;
use crate::forecast::error::ForecastHttpError;
use crate::forecast::types::decode_columnar;
use anyhow::{Context, Result};
use serde_json::Value;
use std::time::Duration;

pub const HOURLY_2DAY_PATH: &str = "/v3/wx/forecast/hourly/2day";

#[async_trait::async_trait]
pub trait ForecastProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Fetches the 2-day hourly forecast for one airport code.
    async fn fetch_hourly(&self, airport: &str) -> Result<ForecastTable>;
}

#[derive(Debug, Clone)]
pub struct HourlyForecastClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    units: String,
    language: String,
}

impl HourlyForecastClient {
    /// Fails without touching the network when the credential is missing.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.require_weather_api_key()?.to_string();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.weather_api_timeout_secs))
            .build()
            .context("failed to build forecast http client")?;

        Ok(Self {
            http,
            base_url: settings.weather_api_base_url.clone(),
            api_key,
            units: settings.weather_units.clone(),
            language: settings.weather_language.clone(),
        })
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), HOURLY_2DAY_PATH)
    }

    async fn fetch_raw(&self, airport: &str) -> Result<Value> {
        let query = [
            ("iataCode", airport),
            ("units", self.units.as_str()),
            ("language", self.language.as_str()),
            ("format", "json"),
            ("apiKey", self.api_key.as_str()),
        ];

        let res = self
            .http
            .get(self.url())
            .query(&query)
            .send()
            .await
            .with_context(|| format!("forecast request failed (airport={airport})"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .with_context(|| format!("failed to read forecast response (airport={airport})"))?;

        if !status.is_success() {
            return Err(ForecastHttpError::new(airport, status.as_u16(), &text).into());
        }

        serde_json::from_str::<Value>(&text)
            .with_context(|| format!("forecast response is not valid JSON (airport={airport})"))
    }
}

#[async_trait::async_trait]
impl ForecastProvider for HourlyForecastClient {
    fn provider_name(&self) -> &'static str {
        "weather_com_hourly_2day"
    }

    async fn fetch_hourly(&self, airport: &str) -> Result<ForecastTable> {
        let raw = self.fetch_raw(airport).await?;
        decode_columnar(&raw).with_context(|| format!("malformed forecast (airport={airport})"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings_for(server: &MockServer) -> Settings {
        Settings {
            weather_api_key: Some("test-key".to_string()),
            weather_api_base_url: server.uri(),
            ..Settings::default()
        }
    }

    #[test]
    fn missing_key_fails_before_any_request() {
        let err = HourlyForecastClient::from_settings(&Settings::default()).unwrap_err();
        assert!(err.to_string().contains("WEATHER_API_KEY"));
    }

    #[tokio::test]
    async fn sends_expected_query_and_decodes_rows() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(HOURLY_2DAY_PATH))
            .and(query_param("iataCode", "LHR"))
            .and(query_param("units", "e"))
            .and(query_param("language", "en-US"))
            .and(query_param("format", "json"))
            .and(query_param("apiKey", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "validTimeUtc": [0, 3600],
                "temperature": [55, 54],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HourlyForecastClient::from_settings(&settings_for(&server)).unwrap();
        let table = client.fetch_hourly("LHR").await.unwrap();

        assert_eq!(table.len(), 2);
        assert!(table.has_column("validTimeUtc"));
    }

    #[tokio::test]
    async fn non_success_status_is_typed_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(HOURLY_2DAY_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let client = HourlyForecastClient::from_settings(&settings_for(&server)).unwrap();
        let err = client.fetch_hourly("SYD").await.unwrap_err();

        let http = err
            .downcast_ref::<ForecastHttpError>()
            .expect("expected ForecastHttpError");
        assert_eq!(http.status, 500);
        assert_eq!(http.airport, "SYD");
        assert_eq!(http.body, "upstream down");
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(HOURLY_2DAY_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "temperature": [1] }))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let settings = Settings {
            weather_api_timeout_secs: 1,
            ..settings_for(&server)
        };
        let client = HourlyForecastClient::from_settings(&settings).unwrap();
        let err = client.fetch_hourly("HKG").await.unwrap_err();
        assert!(err.to_string().contains("forecast request failed"));
    }
}
