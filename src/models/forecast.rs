use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::Installation;

/// Presentation profile attached to every published variable.
pub const POWER_PROFILE: &str = "~Power";

// ─── Metrics ─────────────────────────────────────────────────────────────────

/// The four figures derived from one estimate payload.
///
/// Variables are published under legacy "earnings" names for compatibility
/// with existing dashboards, although the values are power and energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    EnergyToday,
    EnergyTomorrow,
    PeakPowerToday,
    PeakPowerTomorrow,
}

/// Which kind of quantity a series contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    PeakPower,
    DailyEnergy,
}

impl Metric {
    /// Fixed publication order; the index is the variable position.
    pub const ALL: [Metric; 4] = [
        Metric::EnergyToday,
        Metric::EnergyTomorrow,
        Metric::PeakPowerToday,
        Metric::PeakPowerTomorrow,
    ];

    pub fn select(quantity: Quantity, is_today: bool) -> Self {
        match (quantity, is_today) {
            (Quantity::DailyEnergy, true) => Metric::EnergyToday,
            (Quantity::DailyEnergy, false) => Metric::EnergyTomorrow,
            (Quantity::PeakPower, true) => Metric::PeakPowerToday,
            (Quantity::PeakPower, false) => Metric::PeakPowerTomorrow,
        }
    }

    /// Public variable name
    pub fn label(self) -> &'static str {
        match self {
            Metric::EnergyToday => "total earnings today",
            Metric::EnergyTomorrow => "total earnings tomorrow",
            Metric::PeakPowerToday => "max. earnings per hour today",
            Metric::PeakPowerTomorrow => "max. earnings per hour tomorrow",
        }
    }

    pub fn position(self) -> u16 {
        match self {
            Metric::EnergyToday => 0,
            Metric::EnergyTomorrow => 1,
            Metric::PeakPowerToday => 2,
            Metric::PeakPowerTomorrow => 3,
        }
    }
}

/// Aggregated forecast for today and tomorrow, in provider units / 1000.
///
/// Every slot starts at zero and only ever grows (running maximum), so the
/// values are never negative.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ForecastAggregate {
    pub energy_today: f64,
    pub energy_tomorrow: f64,
    pub peak_power_today: f64,
    pub peak_power_tomorrow: f64,
}

impl ForecastAggregate {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::EnergyToday => self.energy_today,
            Metric::EnergyTomorrow => self.energy_tomorrow,
            Metric::PeakPowerToday => self.peak_power_today,
            Metric::PeakPowerTomorrow => self.peak_power_tomorrow,
        }
    }

    fn slot_mut(&mut self, metric: Metric) -> &mut f64 {
        match metric {
            Metric::EnergyToday => &mut self.energy_today,
            Metric::EnergyTomorrow => &mut self.energy_tomorrow,
            Metric::PeakPowerToday => &mut self.peak_power_today,
            Metric::PeakPowerTomorrow => &mut self.peak_power_tomorrow,
        }
    }

    /// Keeps the larger of the current and the given value.
    pub fn raise(&mut self, metric: Metric, value: f64) {
        let slot = self.slot_mut(metric);
        if value > *slot {
            *slot = value;
        }
    }

    /// All four metrics in publication order.
    pub fn entries(&self) -> [(Metric, f64); 4] {
        Metric::ALL.map(|m| (m, self.get(m)))
    }
}

// ─── Host variables ──────────────────────────────────────────────────────────

/// Upsert request handed to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableUpdate {
    pub parent_id: String,
    pub name: String,
    pub value: f64,
    pub position: u16,
    pub profile: String,
}

/// A variable as stored by the host registry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Variable {
    /// Identifier derived from the name
    pub ident: String,
    pub parent_id: String,
    pub name: String,
    pub value: f64,
    pub position: u16,
    pub profile: String,
    pub updated_at: DateTime<Local>,
}

// ─── Instance status ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Starting,
    Active,
    FetchError,
    LocationMissing,
    RateLimited,
    ConfigInvalid,
}

impl InstanceStatus {
    /// Numeric code shown to host UIs and exported over Modbus
    pub fn code(self) -> u16 {
        match self {
            InstanceStatus::Starting => 101,
            InstanceStatus::Active => 102,
            InstanceStatus::FetchError => 200,
            InstanceStatus::LocationMissing => 201,
            InstanceStatus::RateLimited => 202,
            InstanceStatus::ConfigInvalid => 203,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            InstanceStatus::Starting => "starting",
            InstanceStatus::Active => "active",
            InstanceStatus::FetchError => "estimate could not be fetched",
            InstanceStatus::LocationMissing => "location is not configured",
            InstanceStatus::RateLimited => "rate limited, retrying next hour",
            InstanceStatus::ConfigInvalid => "tilt, azimuth and capacity must be non-zero",
        }
    }
}

// ─── REST API response types ──────────────────────────────────────────────────

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub status: InstanceStatus,
    pub code: u16,
    pub message: String,
    /// Next scheduled poll, absent when polling is stopped
    pub next_poll_at: Option<DateTime<Local>>,
    /// Most recent variable update
    pub last_update: Option<DateTime<Local>>,
    pub mqtt_connected: bool,
}

/// Answer to an installation change
#[derive(Debug, Serialize, ToSchema)]
pub struct InstallationApplied {
    pub installation: Installation,
    /// True while the poll timer is armed
    pub polling: bool,
    /// Outcome of the cycle run right after the change
    pub cycle_ok: bool,
    pub status: StatusResponse,
}

/// One entry of the Modbus register layout
#[derive(Debug, Serialize, ToSchema)]
pub struct ModbusRegister {
    pub register_address: u16,
    /// Number of consecutive u16 registers
    pub length: u16,
    pub data_type: String,
    pub description: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    pub error: String,
}
