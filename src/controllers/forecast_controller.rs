use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::info;

use crate::config::{Config, Installation};
use crate::host::Host;
use crate::modbus_server::register_info;
use crate::models::forecast::{ApiError, InstallationApplied, ModbusRegister, StatusResponse, Variable};
use crate::services::updater::ManualOutcome;
use crate::shared_state::{AppState, Updater};

/// POST /api/update
/// Run one estimate cycle now
///
/// Fetches, parses and stores the estimate immediately. Answers with the literal `OK` or `Error`.
#[utoipa::path(
    post,
    path = "/api/update",
    responses(
        (status = 200, description = "Cycle completed", body = String),
        (status = 502, description = "Cycle failed, see /api/status", body = String)
    )
)]
pub async fn trigger_update(State(updater): State<Arc<Updater>>) -> impl IntoResponse {
    let outcome = updater.update_manually().await;
    let status = match outcome {
        ManualOutcome::Ok => StatusCode::OK,
        ManualOutcome::Error => StatusCode::BAD_GATEWAY,
    };
    (status, outcome.as_str()).into_response()
}

/// GET /api/variables
/// List the persisted forecast variables
///
/// Ordered by position. Empty until the first successful cycle.
#[utoipa::path(
    get,
    path = "/api/variables",
    responses(
        (status = 200, description = "Forecast variables", body = Vec<Variable>)
    )
)]
pub async fn list_variables(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.variables()).into_response()
}

/// GET /api/status
#[utoipa::path(
    get,
    path = "/api/status",
    responses(
        (status = 200, description = "Instance status and schedule", body = StatusResponse)
    )
)]
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.status_report()).into_response()
}

/// GET /api/settings/installation
#[utoipa::path(
    get,
    path = "/api/settings/installation",
    responses(
        (status = 200, description = "Current installation settings", body = Installation)
    )
)]
pub async fn get_installation(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.installation()).into_response()
}

/// PUT /api/settings/installation
/// Replace the installation settings
///
/// A complete installation (all values non-zero) re-arms polling and runs a cycle
/// before answering; an incomplete one stops polling.
#[utoipa::path(
    put,
    path = "/api/settings/installation",
    request_body = Installation,
    responses(
        (status = 200, description = "Settings applied", body = InstallationApplied),
        (status = 422, description = "Value out of range", body = ApiError)
    )
)]
pub async fn put_installation(
    State(state): State<AppState>,
    State(updater): State<Arc<Updater>>,
    Json(installation): Json<Installation>,
) -> impl IntoResponse {
    if let Err(e) = installation.validate() {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(ApiError { error: e })).into_response();
    }

    info!(
        "installation changed: tilt {} azimuth {} capacity {} kWp",
        installation.tilt, installation.azimuth, installation.capacity_kw
    );
    state.set_installation(installation);
    let cycle_ok = updater.start().await;

    Json(InstallationApplied {
        installation,
        polling: state.timer().is_some(),
        cycle_ok,
        status: state.status_report(),
    })
    .into_response()
}

/// GET /api/modbus/info
/// Modbus register layout
#[utoipa::path(
    get,
    path = "/api/modbus/info",
    responses(
        (status = 200, description = "List of Modbus registers", body = Vec<ModbusRegister>)
    )
)]
pub async fn get_modbus_info(State(config): State<Config>) -> impl IntoResponse {
    Json(register_info(&config.modbus)).into_response()
}
