//! Sentinel Configuration Module
//!
//! All thresholds, timeouts and labels as operator-tunable TOML values.
//!
//! ## Loading Order
//!
//! 1. `SENTINEL_CONFIG` environment variable (path to TOML file)
//! 2. `sentinel.toml` in the current working directory
//! 3. Built-in defaults ([`defaults`])
//!
//! The loaded config is passed explicitly to the engine and API; there is
//! no global instance.

pub mod defaults;
mod sentinel_config;
pub mod validation;

pub use sentinel_config::*;
