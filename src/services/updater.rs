//! Fetch → parse → persist cycle and its status/timer state machine.
//!
//! | outcome                     | status             | timer                  |
//! |-----------------------------|--------------------|------------------------|
//! | payload accepted            | `Active`           | next hour + 5 s        |
//! | HTTP 429                    | `RateLimited`      | next hour + 5 s        |
//! | any other fetch failure     | `FetchError`       | next hour + 5 s        |
//! | coordinates unavailable     | `LocationMissing`  | next hour + 5 s        |
//! | tilt/azimuth/capacity zero  | `ConfigInvalid`    | stopped                |

use chrono::{DateTime, Local};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::Installation;
use crate::errors::ForecastError;
use crate::host::Host;
use crate::models::forecast::{ForecastAggregate, InstanceStatus, POWER_PROFILE, VariableUpdate};
use crate::services::estimate_parser::parse_and_aggregate;
use crate::services::forecast_client::{EstimateRequest, ForecastClient};
use crate::services::schedule::{FALLBACK_INTERVAL, delay_until_next_poll};

type Clock = Box<dyn Fn() -> DateTime<Local> + Send + Sync>;

/// Result reported by the manual trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualOutcome {
    Ok,
    Error,
}

impl ManualOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ManualOutcome::Ok => "OK",
            ManualOutcome::Error => "Error",
        }
    }
}

pub struct ForecastUpdater<H: Host> {
    host: H,
    client: ForecastClient,
    instance_id: String,
    clock: Clock,
    /// Serializes cycles between the timer loop and the manual trigger
    cycle: Mutex<()>,
}

impl<H: Host> ForecastUpdater<H> {
    pub fn new(host: H, client: ForecastClient, instance_id: impl Into<String>) -> Self {
        Self {
            host,
            client,
            instance_id: instance_id.into(),
            clock: Box::new(Local::now),
            cycle: Mutex::new(()),
        }
    }

    /// Replaces the wall clock, used to pin "today" and the schedule.
    #[cfg(test)]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Local> + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    #[cfg(test)]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// True when every installation parameter is non-zero.
    pub fn read_config(&self) -> bool {
        self.host.installation().is_complete()
    }

    /// Host-ready hook: arms polling and runs a first cycle when the
    /// installation is usable, otherwise stops the timer.
    pub async fn start(&self) -> bool {
        if !self.read_config() {
            self.stop_for_invalid_config();
            return false;
        }

        self.host.set_timer(Some(FALLBACK_INTERVAL));
        self.update().await
    }

    /// Runs one complete cycle.
    pub async fn update(&self) -> bool {
        let _cycle = self.cycle.lock().await;

        let installation = self.host.installation();
        if !installation.is_complete() {
            self.stop_for_invalid_config();
            return false;
        }

        let Some(payload) = self.fetch_estimate(&installation).await else {
            return false;
        };

        let today = (self.clock)().date_naive();
        let aggregate = parse_and_aggregate(&payload, today);
        debug!(?aggregate, %today, "estimate aggregated");

        self.save_data(&aggregate);
        true
    }

    /// Manual trigger entry point
    pub async fn update_manually(&self) -> ManualOutcome {
        if self.update().await {
            ManualOutcome::Ok
        } else {
            ManualOutcome::Error
        }
    }

    /// Requests the estimate and records the outcome as status and timer.
    pub async fn fetch_estimate(&self, installation: &Installation) -> Option<String> {
        let Some(request) = EstimateRequest::new(&self.host.location(), installation) else {
            warn!("latitude/longitude unavailable, skipping estimate request");
            self.host.set_status(InstanceStatus::LocationMissing);
            self.reschedule();
            return None;
        };

        match self.client.fetch(&request).await {
            Ok(payload) => {
                self.host.set_status(InstanceStatus::Active);
                self.reschedule();
                Some(payload)
            }
            Err(ForecastError::RateLimited) => {
                warn!("Forecast.Solar rate limit reached, retrying next hour");
                self.host.set_status(InstanceStatus::RateLimited);
                self.reschedule();
                None
            }
            Err(e) => {
                error!("estimate request failed: {}", e);
                self.host.set_status(InstanceStatus::FetchError);
                self.reschedule();
                None
            }
        }
    }

    fn save_data(&self, aggregate: &ForecastAggregate) {
        for (metric, value) in aggregate.entries() {
            self.host.upsert_variable(VariableUpdate {
                parent_id: self.instance_id.clone(),
                name: metric.label().to_string(),
                value,
                position: metric.position(),
                profile: POWER_PROFILE.to_string(),
            });
        }
        info!(
            "estimate saved: today {:.3} / peak {:.3}, tomorrow {:.3} / peak {:.3}",
            aggregate.energy_today,
            aggregate.peak_power_today,
            aggregate.energy_tomorrow,
            aggregate.peak_power_tomorrow
        );
    }

    fn reschedule(&self) {
        let delay = delay_until_next_poll(&(self.clock)());
        debug!("next estimate poll in {}s", delay.as_secs());
        self.host.set_timer(Some(delay));
    }

    fn stop_for_invalid_config(&self) {
        warn!("tilt, azimuth and capacity must all be non-zero, polling stopped");
        self.host.set_status(InstanceStatus::ConfigInvalid);
        self.host.set_timer(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use chrono::TimeZone;
    use mockito::{Matcher, Server};

    use crate::config::{ForecastConfig, Location};

    const PAYLOAD: &str = "\
watts.2019-06-29 06:00:00;1103
watts.2019-06-29 14:00:00;5292
watts.2019-06-30 13:00:00;5189
watt_hours.2019-06-29 14:00:00;25120
watt_hours_day.2019-06-29;41524
watt_hours_day.2019-06-30;40262
";

    #[derive(Default)]
    struct RecordingHost {
        installation: StdMutex<Installation>,
        location: StdMutex<Location>,
        variables: StdMutex<Vec<VariableUpdate>>,
        statuses: StdMutex<Vec<InstanceStatus>>,
        timers: StdMutex<Vec<Option<Duration>>>,
    }

    impl RecordingHost {
        fn configured() -> Self {
            let host = Self::default();
            *host.installation.lock().unwrap() = Installation { tilt: 25, azimuth: -90.0, capacity_kw: 5.9 };
            *host.location.lock().unwrap() = Location {
                latitude: Some("52,52".to_string()),
                longitude: Some("13,405".to_string()),
            };
            host
        }

        fn last_status(&self) -> Option<InstanceStatus> {
            self.statuses.lock().unwrap().last().copied()
        }

        fn last_timer(&self) -> Option<Option<Duration>> {
            self.timers.lock().unwrap().last().copied()
        }
    }

    impl Host for RecordingHost {
        fn installation(&self) -> Installation {
            *self.installation.lock().unwrap()
        }

        fn location(&self) -> Location {
            self.location.lock().unwrap().clone()
        }

        fn upsert_variable(&self, update: VariableUpdate) {
            self.variables.lock().unwrap().push(update);
        }

        fn set_status(&self, status: InstanceStatus) {
            self.statuses.lock().unwrap().push(status);
        }

        fn set_timer(&self, interval: Option<Duration>) {
            self.timers.lock().unwrap().push(interval);
        }
    }

    fn updater(host: RecordingHost, api_base: String) -> ForecastUpdater<RecordingHost> {
        let client = ForecastClient::new(&ForecastConfig {
            api_base,
            timeout_s: 5,
            user_agent: "test".to_string(),
            accept_invalid_certs: false,
        })
        .unwrap();

        ForecastUpdater::new(host, client, "instance-1")
            .with_clock(|| Local.with_ymd_and_hms(2019, 6, 29, 13, 42, 17).unwrap())
    }

    const NEXT_HOUR: Duration = Duration::from_secs(1068);

    #[tokio::test]
    async fn successful_cycle_persists_four_variables() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/estimate/52.52/13.405/25/-90/5.9")
            .with_status(200)
            .with_body(PAYLOAD)
            .create_async()
            .await;

        let updater = updater(RecordingHost::configured(), server.url());
        assert!(updater.update().await);
        mock.assert_async().await;

        let host = updater.host();
        assert_eq!(host.last_status(), Some(InstanceStatus::Active));
        assert_eq!(host.last_timer(), Some(Some(NEXT_HOUR)));

        let variables = host.variables.lock().unwrap();
        let saved: Vec<(&str, f64, u16)> = variables
            .iter()
            .map(|v| (v.name.as_str(), v.value, v.position))
            .collect();
        assert_eq!(
            saved,
            vec![
                ("total earnings today", 41.524, 0),
                ("total earnings tomorrow", 40.262, 1),
                ("max. earnings per hour today", 5.292, 2),
                ("max. earnings per hour tomorrow", 5.189, 3),
            ]
        );
        assert!(variables.iter().all(|v| v.profile == "~Power" && v.parent_id == "instance-1"));
    }

    #[tokio::test]
    async fn rate_limit_fails_and_retries_next_hour() {
        let mut server = Server::new_async().await;
        server.mock("GET", Matcher::Any).with_status(429).create_async().await;

        let updater = updater(RecordingHost::configured(), server.url());
        assert!(!updater.update().await);

        let host = updater.host();
        assert_eq!(host.last_status(), Some(InstanceStatus::RateLimited));
        assert_eq!(host.last_timer(), Some(Some(NEXT_HOUR)));
        assert!(host.variables.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn success_status_without_marker_is_a_fetch_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .with_status(200)
            .with_body("watts.2019-06-29 14:00:00;5292\n")
            .create_async()
            .await;

        let updater = updater(RecordingHost::configured(), server.url());
        assert!(!updater.update().await);

        let host = updater.host();
        assert_eq!(host.last_status(), Some(InstanceStatus::FetchError));
        assert_eq!(host.last_timer(), Some(Some(NEXT_HOUR)));
        assert!(host.variables.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn server_error_is_a_fetch_error() {
        let mut server = Server::new_async().await;
        server.mock("GET", Matcher::Any).with_status(503).create_async().await;

        let updater = updater(RecordingHost::configured(), server.url());
        assert!(!updater.update().await);
        assert_eq!(updater.host().last_status(), Some(InstanceStatus::FetchError));
    }

    #[tokio::test]
    async fn connection_failure_is_a_fetch_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let updater = updater(RecordingHost::configured(), format!("http://127.0.0.1:{}", port));
        assert!(!updater.update().await);

        let host = updater.host();
        assert_eq!(host.last_status(), Some(InstanceStatus::FetchError));
        assert_eq!(host.last_timer(), Some(Some(NEXT_HOUR)));
        assert!(host.variables.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_location_skips_the_request() {
        let mut server = Server::new_async().await;
        let mock = server.mock("GET", Matcher::Any).expect(0).create_async().await;

        let host = RecordingHost::configured();
        *host.location.lock().unwrap() = Location { latitude: Some("52.52".to_string()), longitude: None };

        let updater = updater(host, server.url());
        assert!(!updater.update().await);
        mock.assert_async().await;

        assert_eq!(updater.host().last_status(), Some(InstanceStatus::LocationMissing));
        assert_eq!(updater.host().last_timer(), Some(Some(NEXT_HOUR)));
    }

    #[tokio::test]
    async fn incomplete_installation_stops_polling() {
        let mut server = Server::new_async().await;
        let mock = server.mock("GET", Matcher::Any).expect(0).create_async().await;

        let host = RecordingHost::configured();
        host.installation.lock().unwrap().azimuth = 0.0;

        let updater = updater(host, server.url());
        assert!(!updater.read_config());
        assert!(!updater.start().await);
        mock.assert_async().await;

        assert_eq!(updater.host().last_status(), Some(InstanceStatus::ConfigInvalid));
        assert_eq!(updater.host().last_timer(), Some(None));
    }

    #[tokio::test]
    async fn start_arms_timer_then_aligns_it() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .with_status(200)
            .with_body(PAYLOAD)
            .create_async()
            .await;

        let updater = updater(RecordingHost::configured(), server.url());
        assert!(updater.start().await);

        let timers = updater.host().timers.lock().unwrap().clone();
        assert_eq!(timers, vec![Some(FALLBACK_INTERVAL), Some(NEXT_HOUR)]);
    }

    #[tokio::test]
    async fn manual_trigger_reports_ok_or_error() {
        let mut server = Server::new_async().await;
        let ok = server
            .mock("GET", Matcher::Any)
            .with_status(200)
            .with_body(PAYLOAD)
            .expect(1)
            .create_async()
            .await;

        let updater = updater(RecordingHost::configured(), server.url());
        assert_eq!(updater.update_manually().await.as_str(), "OK");
        ok.assert_async().await;
        ok.remove_async().await;

        server.mock("GET", Matcher::Any).with_status(500).create_async().await;
        assert_eq!(updater.update_manually().await.as_str(), "Error");
    }

    #[tokio::test]
    async fn repeated_cycles_upsert_identical_values() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .with_status(200)
            .with_body(PAYLOAD)
            .expect(2)
            .create_async()
            .await;

        let updater = updater(RecordingHost::configured(), server.url());
        assert!(updater.update().await);
        assert!(updater.update().await);

        let variables = updater.host().variables.lock().unwrap();
        assert_eq!(variables.len(), 8);
        assert_eq!(variables[..4], variables[4..]);
    }
}
