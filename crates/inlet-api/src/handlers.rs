//! API request handlers

pub mod health;
pub mod inbound;
pub mod metrics;

pub use health::*;
