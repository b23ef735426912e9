//! HTTP server: stream upgrades, health checks and metrics

pub mod shared;
pub use shared::SharedState;

pub mod http_server;
pub use http_server::{router, run_http_server, serve};
