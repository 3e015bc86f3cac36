//! Infrastructure layer: configuration, AMQP broker adapters, the remote key
//! set cache, and the per-service reconcilers.

pub mod broker;
pub mod config;
pub mod jwks;
pub mod read_model;
pub mod reconcilers;

mod integration_tests;

pub use config::{AppConfig, ConfigError, ServiceRole};
pub use jwks::{JwksError, RemoteJwks};
