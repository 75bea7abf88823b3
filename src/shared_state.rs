use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::FromRef;
use chrono::{DateTime, Local, TimeDelta};
use tokio::sync::Notify;
use tracing::debug;

use crate::config::{Config, Installation, Location};
use crate::host::Host;
use crate::models::forecast::{InstanceStatus, StatusResponse, Variable, VariableUpdate};
use crate::services::updater::ForecastUpdater;

pub type Updater = ForecastUpdater<AppState>;

/// Recurring poll timer: fires at `next`, then every `interval`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollTimer {
    pub interval: Duration,
    pub next: DateTime<Local>,
}

/// In-process automation host: settings, variable registry, status and timer.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Variables keyed by identifier
    variables: Arc<RwLock<BTreeMap<String, Variable>>>,
    status: Arc<RwLock<InstanceStatus>>,
    installation: Arc<RwLock<Installation>>,
    location: Arc<RwLock<Location>>,
    timer: Arc<RwLock<Option<PollTimer>>>,
    timer_changed: Arc<Notify>,
    pub mqtt_connected: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            variables: Arc::new(RwLock::new(BTreeMap::new())),
            status: Arc::new(RwLock::new(InstanceStatus::Starting)),
            installation: Arc::new(RwLock::new(config.installation)),
            location: Arc::new(RwLock::new(config.location.clone())),
            timer: Arc::new(RwLock::new(None)),
            timer_changed: Arc::new(Notify::new()),
            mqtt_connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn status(&self) -> InstanceStatus {
        self.status.read().map(|s| *s).unwrap_or(InstanceStatus::Starting)
    }

    pub fn set_installation(&self, installation: Installation) {
        if let Ok(mut current) = self.installation.write() {
            *current = installation;
        }
    }

    pub fn timer(&self) -> Option<PollTimer> {
        self.timer.read().ok().and_then(|t| *t)
    }

    /// Waits until the timer is re-armed or stopped.
    pub async fn timer_changed(&self) {
        self.timer_changed.notified().await;
    }

    /// Moves a fired timer forward by its interval. Returns false when the
    /// timer was replaced or stopped in the meantime.
    pub fn advance_timer(&self, fired: &PollTimer, now: DateTime<Local>) -> bool {
        let Ok(mut timer) = self.timer.write() else {
            return false;
        };
        match timer.as_mut() {
            Some(current) if current == fired => {
                current.next = after(now, current.interval);
                true
            }
            _ => false,
        }
    }

    pub fn variables(&self) -> Vec<Variable> {
        let mut list: Vec<Variable> = self
            .variables
            .read()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default();
        list.sort_by_key(|v| v.position);
        list
    }

    pub fn variable_at(&self, position: u16) -> Option<Variable> {
        self.variables
            .read()
            .ok()
            .and_then(|map| map.values().find(|v| v.position == position).cloned())
    }

    pub fn status_report(&self) -> StatusResponse {
        let status = self.status();
        StatusResponse {
            status,
            code: status.code(),
            message: status.label().to_string(),
            next_poll_at: self.timer().map(|t| t.next),
            last_update: self.variables().iter().map(|v| v.updated_at).max(),
            mqtt_connected: self.is_mqtt_connected(),
        }
    }

    pub fn is_mqtt_connected(&self) -> bool {
        self.mqtt_connected.load(Ordering::Relaxed)
    }

    pub fn set_mqtt_connected(&self, value: bool) {
        self.mqtt_connected.store(value, Ordering::Relaxed);
    }
}

impl Host for AppState {
    fn installation(&self) -> Installation {
        self.installation.read().map(|i| *i).unwrap_or_default()
    }

    fn location(&self) -> Location {
        self.location.read().map(|l| l.clone()).unwrap_or_default()
    }

    fn upsert_variable(&self, update: VariableUpdate) {
        let ident = variable_ident(&update.name);
        if let Ok(mut map) = self.variables.write() {
            let now = Local::now();
            match map.get_mut(&ident) {
                Some(existing) => {
                    existing.value = update.value;
                    existing.position = update.position;
                    existing.profile = update.profile;
                    existing.updated_at = now;
                }
                None => {
                    debug!("creating variable {} ({})", update.name, ident);
                    map.insert(ident.clone(), Variable {
                        ident,
                        parent_id: update.parent_id,
                        name: update.name,
                        value: update.value,
                        position: update.position,
                        profile: update.profile,
                        updated_at: now,
                    });
                }
            }
        }
    }

    fn set_status(&self, status: InstanceStatus) {
        if let Ok(mut current) = self.status.write() {
            *current = status;
        }
    }

    fn set_timer(&self, interval: Option<Duration>) {
        if let Ok(mut timer) = self.timer.write() {
            *timer = interval.map(|interval| PollTimer {
                interval,
                next: after(Local::now(), interval),
            });
        }
        self.timer_changed.notify_one();
    }
}

/// `"max. earnings per hour today"` -> `"max_earnings_per_hour_today"`
pub fn variable_ident(name: &str) -> String {
    let mut ident = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            ident.push(c.to_ascii_lowercase());
        } else if !ident.is_empty() && !ident.ends_with('_') {
            ident.push('_');
        }
    }
    ident.trim_end_matches('_').to_string()
}

fn after(now: DateTime<Local>, interval: Duration) -> DateTime<Local> {
    TimeDelta::from_std(interval)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(now)
}

/// State handed to the axum router
#[derive(Clone)]
pub struct SharedState {
    pub app: AppState,
    pub updater: Arc<Updater>,
    pub config: Config,
}

impl FromRef<SharedState> for Config {
    fn from_ref(shared: &SharedState) -> Self {
        shared.config.clone()
    }
}

impl FromRef<SharedState> for AppState {
    fn from_ref(shared: &SharedState) -> Self {
        shared.app.clone()
    }
}

impl FromRef<SharedState> for Arc<Updater> {
    fn from_ref(shared: &SharedState) -> Self {
        shared.updater.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        let config: Config = serde_json::from_str("{}").unwrap();
        AppState::new(&config)
    }

    fn update(name: &str, value: f64, position: u16) -> VariableUpdate {
        VariableUpdate {
            parent_id: "forecast-solar".to_string(),
            name: name.to_string(),
            value,
            position,
            profile: "~Power".to_string(),
        }
    }

    #[test]
    fn idents_are_derived_from_names() {
        assert_eq!(variable_ident("max. earnings per hour today"), "max_earnings_per_hour_today");
        assert_eq!(variable_ident("total earnings tomorrow"), "total_earnings_tomorrow");
    }

    #[test]
    fn upsert_creates_then_updates() {
        let state = state();
        state.upsert_variable(update("total earnings tomorrow", 1.0, 1));
        state.upsert_variable(update("total earnings today", 2.0, 0));
        state.upsert_variable(update("total earnings tomorrow", 3.5, 1));

        let variables = state.variables();
        assert_eq!(variables.len(), 2);
        assert_eq!(variables[0].name, "total earnings today");
        assert_eq!(variables[1].value, 3.5);
        assert_eq!(state.variable_at(1).map(|v| v.ident), Some("total_earnings_tomorrow".to_string()));
    }

    #[test]
    fn timer_can_be_armed_advanced_and_stopped() {
        let state = state();
        assert!(state.timer().is_none());

        state.set_timer(Some(Duration::from_secs(60)));
        let fired = state.timer().unwrap();
        let now = Local::now();
        assert!(state.advance_timer(&fired, now));
        assert_eq!(state.timer().unwrap().next, now + TimeDelta::seconds(60));

        // a stale handle does not move a re-armed timer
        assert!(!state.advance_timer(&fired, now));

        state.set_timer(None);
        assert!(state.timer().is_none());
        assert!(state.status_report().next_poll_at.is_none());
    }

    #[test]
    fn status_report_reflects_host_status() {
        let state = state();
        assert_eq!(state.status_report().code, 101);

        state.set_status(InstanceStatus::RateLimited);
        let report = state.status_report();
        assert_eq!(report.status, InstanceStatus::RateLimited);
        assert_eq!(report.code, 202);
        assert!(report.last_update.is_none());
    }
}
