use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::errors::ConfigError;
use crate::models::forecast::Metric;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const CONFIG_PATH_ENV: &str = "FORECAST_SOLAR_CONFIG";

fn default_instance_id() -> String { "forecast-solar".to_string() }
fn default_server_port() -> u16 { 8080 }
fn default_api_base() -> String { "https://api.forecast.solar".to_string() }
fn default_timeout_s() -> u64 { 60 }
fn default_user_agent() -> String { format!("forecast-solar-bridge/{}", env!("CARGO_PKG_VERSION")) }
fn default_tilt() -> i32 { 25 }
fn default_capacity_kw() -> f64 { 5.9 }
fn default_mqtt_port() -> u16 { 1883 }
fn default_topic_prefix() -> String { "forecast-solar".to_string() }
fn default_modbus_port() -> u16 { 5020 }
fn default_status_address() -> u16 { 100 }

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Identifier of the owning instance, stamped on every variable
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub installation: Installation,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub modbus: ModbusConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_server_port() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForecastConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Skips TLS certificate verification for the estimate request.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            timeout_s: default_timeout_s(),
            user_agent: default_user_agent(),
            accept_invalid_certs: false,
        }
    }
}

/// Physical installation parameters required by the estimate endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Installation {
    /// Panel tilt in degrees (0 = horizontal, 90 = vertical)
    #[serde(default = "default_tilt")]
    pub tilt: i32,
    /// Panel azimuth in degrees (-180 = north, -90 = east, 0 = south, 90 = west, 180 = north)
    #[serde(default)]
    pub azimuth: f64,
    /// Installed module power in kWp
    #[serde(default = "default_capacity_kw")]
    pub capacity_kw: f64,
}

impl Default for Installation {
    fn default() -> Self {
        Self {
            tilt: default_tilt(),
            azimuth: 0.0,
            capacity_kw: default_capacity_kw(),
        }
    }
}

impl Installation {
    /// Polling only runs when every parameter is non-zero.
    pub fn is_complete(&self) -> bool {
        self.tilt != 0 && self.azimuth != 0.0 && self.capacity_kw != 0.0
    }

    /// Range check, independent of completeness.
    pub fn validate(&self) -> Result<(), String> {
        if !(0..=90).contains(&self.tilt) {
            return Err(format!("tilt must be within 0..=90, got {}", self.tilt));
        }
        if !(-180.0..=180.0).contains(&self.azimuth) {
            return Err(format!("azimuth must be within -180..=180, got {}", self.azimuth));
        }
        if !self.capacity_kw.is_finite() || self.capacity_kw < 0.0 {
            return Err(format!("capacity_kw must be a non-negative number, got {}", self.capacity_kw));
        }
        Ok(())
    }
}

/// Site coordinates as stored by the host. Values are kept as text since
/// locale-formatted input ("52,52") is accepted and normalised at request time.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Location {
    #[serde(default, deserialize_with = "deserialize_coordinate")]
    pub latitude: Option<String>,
    #[serde(default, deserialize_with = "deserialize_coordinate")]
    pub longitude: Option<String>,
}

fn deserialize_coordinate<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where D: Deserializer<'de> {

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(Error::custom(format!("invalid coordinate: {}", other))),
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub broker_host: String,
    #[serde(default = "default_mqtt_port")]
    pub broker_port: u16,
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publish_interval_s: Option<u64>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_host: String::new(),
            broker_port: default_mqtt_port(),
            client_id: String::new(),
            topic_prefix: default_topic_prefix(),
            username: None,
            password: None,
            publish_interval_s: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModbusConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    /// First register of the variable block; variable `n` occupies `base + 2n` and `base + 2n + 1`
    #[serde(default)]
    pub base_address: u16,
    #[serde(default = "default_status_address")]
    pub status_address: u16,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_modbus_port(),
            base_address: 0,
            status_address: default_status_address(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.installation.validate().map_err(ConfigError::Invalid)?;

        if self.forecast.timeout_s == 0 {
            return Err(ConfigError::Invalid("forecast.timeout_s must be greater than zero".to_string()));
        }
        if self.mqtt.enabled && self.mqtt.broker_host.is_empty() {
            return Err(ConfigError::Invalid("mqtt.broker_host is required when mqtt is enabled".to_string()));
        }
        let block_len = 2 * Metric::ALL.len() as u32;
        // exclusive end of the variable block
        let block_end = u32::from(self.modbus.base_address) + block_len;
        if self.modbus.enabled && block_end > u32::from(u16::MAX) + 1 {
            return Err(ConfigError::Invalid("modbus.base_address leaves no room for the variable block".to_string()));
        }
        let status = u32::from(self.modbus.status_address);
        if self.modbus.enabled && (u32::from(self.modbus.base_address)..block_end).contains(&status) {
            return Err(ConfigError::Invalid("modbus.status_address overlaps the variable block".to_string()));
        }
        Ok(())
    }
}

/// Config file path: first CLI argument, then `FORECAST_SOLAR_CONFIG`, then `config.json`.
pub fn config_path() -> String {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}
