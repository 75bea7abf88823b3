pub mod estimate_parser;
pub mod forecast_client;
pub mod mqtt_service;
pub mod poller;
pub mod schedule;
pub mod updater;
