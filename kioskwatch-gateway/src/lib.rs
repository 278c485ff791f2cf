//! Data-plane gateway for KioskWatch.
//!
//! Supervises one external transcoder child per camera, fans frames out
//! to admitted viewers, and reports stream health back to the control
//! plane. Admission is strictly capability-based: a viewer presents a
//! single-use stream token minted by the control backend; the gateway
//! validates it offline against the shared signing key.

pub mod admission;
pub mod health;
pub mod http;
pub mod supervisor;
pub mod worker;

pub use http::{create_router, GatewayState};
pub use supervisor::StreamSupervisor;
