pub mod api;
pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod outbox;
pub mod telemetry;

pub use error::GatewayError;
