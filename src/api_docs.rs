use utoipa::OpenApi;
use crate::controllers::forecast_controller;
use crate::models::forecast;
use crate::config;

#[derive(OpenApi)]
#[openapi(
    paths(
        forecast_controller::trigger_update,
        forecast_controller::list_variables,
        forecast_controller::get_status,
        forecast_controller::get_installation,
        forecast_controller::put_installation,
        forecast_controller::get_modbus_info
    ),
    components(
        schemas(
            forecast::Variable,
            forecast::InstanceStatus,
            forecast::StatusResponse,
            forecast::InstallationApplied,
            forecast::ModbusRegister,
            forecast::ApiError,
            config::Installation
        )
    ),
    tags(
        (name = "forecast-solar-bridge", description = "Forecast.Solar estimate bridge API")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();

        for path in ["/api/update", "/api/variables", "/api/status", "/api/settings/installation", "/api/modbus/info"] {
            assert!(paths.contains(&path), "{} missing from OpenAPI document", path);
        }
    }
}
