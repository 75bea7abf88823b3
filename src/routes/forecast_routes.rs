use axum::{routing::{get, post}, Router};
use crate::controllers::forecast_controller::{
    // Estimate cycle
    trigger_update, list_variables, get_status,
    // Settings
    get_installation, put_installation,
    // Modbus
    get_modbus_info,
};
use crate::shared_state::SharedState;

/// Build the `/api/*` sub-router.
/// Handlers extract `State<AppState>`, `State<Arc<Updater>>` and/or `State<Config>`
/// via `FromRef<SharedState>`.
pub fn api_routes(shared: SharedState) -> Router {
    Router::new()
        .route("/update",                 post(trigger_update))
        .route("/variables",              get(list_variables))
        .route("/status",                 get(get_status))
        .route("/settings/installation",  get(get_installation).put(put_installation))
        .route("/modbus/info",            get(get_modbus_info))
        .with_state(shared)
}
