//! Core domain layer for KioskWatch.
//!
//! Everything the two transport planes share lives here: the data model,
//! the signaling protocol catalogue, token signing/verification, the
//! camera registry, the presence/session stores and the call state
//! machine. Transport adapters (`kioskwatch-hub`, `kioskwatch-gateway`)
//! stay thin on top of these services.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod protocol;
pub mod service;
pub mod validation;

pub use config::Config;
pub use error::{Error, Result};
