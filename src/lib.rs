//! probemq – a command-line probe for MQTT brokers.
//!
//! This crate exports
//!  * `core`   – message envelope builder and error taxonomy
//!  * `client` – broker session wrapper over a pluggable transport
//!  * `config` – TOML-driven connection configuration
//!
//! The binary drives a single pub or sub action against a broker; the
//! library pieces are reusable for scripted broker checks.

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod client;
pub mod config;
pub mod core;
pub mod logging;
pub mod util;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use crate::client::BrokerClient;
pub use crate::config::{load_config, BrokerConfig};
pub use crate::core::message::MsgBuilder;
