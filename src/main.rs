mod routes;
mod controllers;
mod services;
mod models;
mod api_docs;
mod shared_state;
mod modbus_server;
mod config;
mod errors;
mod host;

use std::net::SocketAddr;
use std::sync::Arc;
use axum::{Router, routing::get, response::Html};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_scalar::Scalar;

use crate::api_docs::ApiDoc;
use crate::config::{Config, config_path};
use crate::routes::forecast_routes::api_routes;
use crate::services::forecast_client::ForecastClient;
use crate::services::updater::ForecastUpdater;
use crate::shared_state::{AppState, SharedState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("forecast_solar_bridge=info")),
        )
        .init();

    // 1. Load configuration
    let path = config_path();
    let config = match Config::load(&path) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load {}: {}", path, e);
            return Err(e.into());
        }
    };
    info!(
        path = %path,
        instance = %config.instance_id,
        "Configuration loaded: tilt {} azimuth {} capacity {} kWp",
        config.installation.tilt, config.installation.azimuth, config.installation.capacity_kw
    );

    // 2. Host state and the estimate updater
    let state = AppState::new(&config);
    let client = ForecastClient::new(&config.forecast)?;
    let updater = Arc::new(ForecastUpdater::new(state.clone(), client, config.instance_id.clone()));

    // 3. Poll timer loop, then the ready hook that arms it
    tokio::spawn(services::poller::run_timer_loop(state.clone(), updater.clone()));
    {
        let updater = updater.clone();
        tokio::spawn(async move {
            updater.start().await;
        });
    }

    // 4. Modbus TCP server
    let modbus_addr = SocketAddr::from(([0, 0, 0, 0], config.modbus.port));
    if config.modbus.enabled {
        let register_map = modbus_server::register_map(&config.modbus);
        info!(
            "[MODBUS MAP] variables @{}..{} (float32, 2 regs each), status @{}",
            config.modbus.base_address,
            config.modbus.base_address + 2 * models::forecast::Metric::ALL.len() as u16 - 1,
            config.modbus.status_address
        );
        let state_modbus = state.clone();
        tokio::spawn(async move {
            if let Err(e) = modbus_server::run_server(modbus_addr, state_modbus, register_map).await {
                error!("Modbus server error: {}", e);
            }
        });
    }

    // 5. MQTT publisher
    if config.mqtt.enabled {
        tokio::spawn(services::mqtt_service::run_publisher(config.mqtt.clone(), state.clone()));
    }

    // 6. Axum HTTP server
    let server_port = config.server.port;
    let shared = SharedState { app: state, updater, config };
    let app = Router::new()
        .nest("/api", api_routes(shared))
        .route("/scalar", get(|| async {
            Html(Scalar::new(ApiDoc::openapi()).to_html())
        }))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], server_port));
    info!("API Server listening on http://{}", addr);
    info!("Scalar UI: http://{}/scalar", addr);

    axum_server::bind(addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
