//! MQTT variable publisher
//!
//! Mirrors the host variables to a broker as retained JSON payloads.
//! Topic structure: `{prefix}/variables/{ident}` per variable, the instance
//! status on `{prefix}/status` and the birth message on `{prefix}/system/status`.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::models::forecast::{StatusResponse, Variable};
use crate::shared_state::AppState;

const DEFAULT_INTERVAL_S: u64 = 60;
const REQUEST_QUEUE_CAP: usize = 64;

pub fn variable_topic(prefix: &str, variable: &Variable) -> String {
    format!("{}/variables/{}", prefix, variable.ident)
}

pub fn variable_payload(variable: &Variable) -> Value {
    json!({
        "name":       variable.name,
        "value":      variable.value,
        "position":   variable.position,
        "profile":    variable.profile,
        "parent_id":  variable.parent_id,
        "updated_at": variable.updated_at.to_rfc3339(),
    })
}

pub fn status_payload(report: &StatusResponse) -> Value {
    json!({
        "status":       report.status,
        "code":         report.code,
        "message":      report.message,
        "next_poll_at": report.next_poll_at.map(|t| t.to_rfc3339()),
        "timestamp":    chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn run_publisher(cfg: MqttConfig, state: AppState) {
    if !cfg.enabled || cfg.broker_host.is_empty() {
        info!("MQTT disabled or no broker configured, skipping publisher");
        return;
    }

    let client_id = if cfg.client_id.is_empty() {
        format!("forecast-solar-{}", uuid::Uuid::new_v4())
    } else {
        cfg.client_id.clone()
    };

    let interval_s = cfg.publish_interval_s.unwrap_or(DEFAULT_INTERVAL_S).max(1);
    let prefix = cfg.topic_prefix.trim_end_matches('/').to_string();
    let system_topic = format!("{}/system/status", prefix);

    info!(
        "MQTT connecting to {}:{} (client_id={}, interval={}s)",
        cfg.broker_host, cfg.broker_port, client_id, interval_s
    );

    let mut opts = MqttOptions::new(&client_id, &cfg.broker_host, cfg.broker_port);
    opts.set_keep_alive(Duration::from_secs(30));
    opts.set_clean_session(true);
    opts.set_last_will(LastWill::new(
        &system_topic,
        json!({ "status": "OFFLINE" }).to_string(),
        QoS::AtLeastOnce,
        true,
    ));

    if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
        opts.set_credentials(user, pass);
    }

    let (client, eventloop) = AsyncClient::new(opts, REQUEST_QUEUE_CAP);
    tokio::spawn(drive_event_loop(eventloop, state.clone(), system_topic.clone()));

    let birth_payload = json!({
        "status": "ONLINE",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    if let Err(e) = client.try_publish(&system_topic, QoS::AtLeastOnce, true, birth_payload.to_string()) {
        error!("MQTT failed to queue birth message: {}", e);
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_s));
    loop {
        ticker.tick().await;
        publish_snapshot(&client, &prefix, &state);
    }
}

/// Drives the broker connection and tracks the connected flag.
async fn drive_event_loop(mut eventloop: EventLoop, state: AppState, system_topic: String) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected, birth message on {}", system_topic);
                state.set_mqtt_connected(true);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT event loop error: {}, will reconnect", e);
                state.set_mqtt_connected(false);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

/// Queues every variable and the status without waiting. Messages that do
/// not fit in the request queue are dropped; returns how many were queued.
pub fn publish_snapshot(client: &AsyncClient, prefix: &str, state: &AppState) -> usize {
    let mut messages: Vec<(String, Value)> = state
        .variables()
        .iter()
        .map(|variable| (variable_topic(prefix, variable), variable_payload(variable)))
        .collect();
    messages.push((format!("{}/status", prefix), status_payload(&state.status_report())));

    let total = messages.len();
    let mut queued = 0;
    for (topic, payload) in messages {
        match client.try_publish(&topic, QoS::AtLeastOnce, true, payload.to_string()) {
            Ok(()) => queued += 1,
            Err(e) => debug!("MQTT dropped {}: {}", topic, e),
        }
    }

    if queued < total {
        warn!("MQTT request queue full, dropped {} of {} messages", total - queued, total);
    }
    queued
}
