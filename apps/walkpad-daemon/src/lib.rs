pub mod cli;
pub mod config;
pub mod controller;
pub mod device;
pub mod hook;
pub mod metrics;
pub mod routes;
pub mod shutdown;
pub mod state;
pub mod telemetry;
pub mod watchdog;
