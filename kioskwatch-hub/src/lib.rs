//! Control-plane transport for KioskWatch.
//!
//! Thin adapters over `kioskwatch-core`: the signaling WebSocket and the
//! control-backend HTTP API (camera registry, stream tokens, health
//! callback). All state lives in the core services; this crate only
//! moves frames and maps errors to HTTP.

pub mod gateway;
pub mod http;
pub mod ws;

pub use gateway::GatewayClient;
pub use http::{create_router, AppState};
