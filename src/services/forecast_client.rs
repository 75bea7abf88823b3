use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::config::{ForecastConfig, Installation, Location};
use crate::errors::ForecastError;

/// Substring every complete estimate payload contains.
pub const SUCCESS_MARKER: &str = "watt_hours_day";

const CSV: &str = "text/csv";

/// Path parameters of one estimate request
#[derive(Debug, Clone, PartialEq)]
pub struct EstimateRequest {
    pub latitude: String,
    pub longitude: String,
    pub tilt: i32,
    pub azimuth: f64,
    pub capacity_kw: f64,
}

impl EstimateRequest {
    /// Returns `None` when either coordinate is unavailable.
    pub fn new(location: &Location, installation: &Installation) -> Option<Self> {
        let latitude = normalize_decimal(location.latitude.as_deref()?)?;
        let longitude = normalize_decimal(location.longitude.as_deref()?)?;

        Some(Self {
            latitude,
            longitude,
            tilt: installation.tilt,
            azimuth: installation.azimuth,
            capacity_kw: installation.capacity_kw,
        })
    }

    pub fn path(&self) -> String {
        format!(
            "/estimate/{}/{}/{}/{}/{}",
            self.latitude, self.longitude, self.tilt, self.azimuth, self.capacity_kw
        )
    }
}

/// Turns locale output such as `"52,52"` into `"52.52"`; blank input is treated as missing.
fn normalize_decimal(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.replace(',', "."))
    }
}

/// Forecast.Solar estimate client
#[derive(Debug, Clone)]
pub struct ForecastClient {
    client: Client,
    api_base: String,
}

impl ForecastClient {
    pub fn new(config: &ForecastConfig) -> Result<Self, ForecastError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(CSV));
        headers.insert(ACCEPT, HeaderValue::from_static(CSV));

        if config.accept_invalid_certs {
            warn!("TLS certificate verification is disabled for {}", config.api_base);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_s))
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, request: &EstimateRequest) -> String {
        format!("{}{}", self.api_base, request.path())
    }

    /// Fetches the raw estimate payload.
    ///
    /// Only a 200 whose body carries the `watt_hours_day` series counts as a
    /// success; 429 is reported separately so the caller can treat it as
    /// transient.
    pub async fn fetch(&self, request: &EstimateRequest) -> Result<String, ForecastError> {
        let url = self.endpoint(request);
        debug!("Endpoint: {}", url);

        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.text().await?;

                #[cfg(feature = "verbose_log")]
                tracing::info!("Forecast.Solar response:\n{}", body);

                check_payload(body)
            }
            StatusCode::TOO_MANY_REQUESTS => Err(ForecastError::RateLimited),
            status => Err(ForecastError::Status(status.as_u16())),
        }
    }
}

fn check_payload(body: String) -> Result<String, ForecastError> {
    if body.trim().is_empty() {
        Err(ForecastError::EmptyBody)
    } else if !body.contains(SUCCESS_MARKER) {
        Err(ForecastError::MissingMarker)
    } else {
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn location(lat: &str, lon: &str) -> Location {
        Location { latitude: Some(lat.to_string()), longitude: Some(lon.to_string()) }
    }

    fn installation() -> Installation {
        Installation { tilt: 25, azimuth: -90.0, capacity_kw: 5.9 }
    }

    fn client_for(url: String) -> ForecastClient {
        ForecastClient::new(&ForecastConfig {
            api_base: url,
            timeout_s: 5,
            user_agent: "forecast-solar-bridge-test".to_string(),
            accept_invalid_certs: false,
        })
        .unwrap()
    }

    #[test]
    fn request_path_normalizes_decimal_commas() {
        let request = EstimateRequest::new(&location("52,52", " 13,405 "), &installation()).unwrap();
        assert_eq!(request.path(), "/estimate/52.52/13.405/25/-90/5.9");
    }

    #[test]
    fn missing_or_blank_coordinates_yield_no_request() {
        let half = Location { latitude: Some("52.52".to_string()), longitude: None };
        assert!(EstimateRequest::new(&half, &installation()).is_none());
        assert!(EstimateRequest::new(&location("52.52", "  "), &installation()).is_none());
        assert!(EstimateRequest::new(&Location::default(), &installation()).is_none());
    }

    #[tokio::test]
    async fn fetch_sends_csv_headers_and_returns_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/estimate/52.52/13.405/25/-90/5.9")
            .match_header("accept", "text/csv")
            .match_header("content-type", "text/csv")
            .match_header("user-agent", "forecast-solar-bridge-test")
            .with_status(200)
            .with_body("watts.2019-06-29 14:00:00;5292\nwatt_hours_day.2019-06-29;41524\n")
            .create_async()
            .await;

        let client = client_for(server.url());
        let request = EstimateRequest::new(&location("52.52", "13.405"), &installation()).unwrap();
        let body = client.fetch(&request).await.unwrap();

        assert!(body.contains("watt_hours_day"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_reports_rate_limit() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let client = client_for(server.url());
        let request = EstimateRequest::new(&location("52.52", "13.405"), &installation()).unwrap();
        let err = client.fetch(&request).await.unwrap_err();

        assert!(matches!(err, ForecastError::RateLimited));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_rejects_success_without_marker() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .with_status(200)
            .with_body("watts.2019-06-29 14:00:00;5292\n")
            .create_async()
            .await;

        let client = client_for(server.url());
        let request = EstimateRequest::new(&location("52.52", "13.405"), &installation()).unwrap();
        let err = client.fetch(&request).await.unwrap_err();

        assert!(matches!(err, ForecastError::MissingMarker));
    }

    #[tokio::test]
    async fn fetch_reports_other_statuses() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .with_status(400)
            .with_body("watt_hours_day")
            .create_async()
            .await;

        let client = client_for(server.url());
        let request = EstimateRequest::new(&location("52.52", "13.405"), &installation()).unwrap();
        let err = client.fetch(&request).await.unwrap_err();

        assert!(matches!(err, ForecastError::Status(400)));
    }

    #[test]
    fn empty_body_is_not_a_payload() {
        assert!(matches!(check_payload(String::new()), Err(ForecastError::EmptyBody)));
        assert!(matches!(check_payload("\n".to_string()), Err(ForecastError::EmptyBody)));
    }
}
