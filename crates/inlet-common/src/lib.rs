//! Inlet Common - Shared types and configuration
//!
//! This crate provides the configuration tree, the shared error type and the
//! address/identifier types used by every Inlet component.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
