use thiserror::Error;

/// Failures of a single estimate request
#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("provider returned status {0}")]
    Status(u16),

    #[error("empty response body")]
    EmptyBody,

    #[error("response does not contain the `watt_hours_day` series")]
    MissingMarker,
}

/// Failures while loading `config.json`
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to parse config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
