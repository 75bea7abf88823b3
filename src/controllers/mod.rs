pub mod forecast_controller;
