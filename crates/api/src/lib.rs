//! HTTP API and service runtime: discovery, health, bearer authentication,
//! and the per-role wiring of broker consumers.

pub mod app;
pub mod authz;
pub mod context;
pub mod middleware;
pub mod server;
