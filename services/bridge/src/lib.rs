//! # RSP Bridge - Daemon Library
//!
//! ## Purpose
//! Everything the `rsp-bridge` binary does, minus process concerns: load
//! the TOML configuration, claim the PID file, build the adapter runtime
//! around a host connection, register the built-in adapter types, bring up
//! the configured instances and optionally embed the group relay.
//!
//! ## Message Flow
//! ```text
//! adapters → AdapterRuntime → ConnectionManager → host (port 42001)
//! host → ConnectionManager → dispatch table → inbound-capable adapters
//! clients ⇄ GroupRelayServer (port 42002, optional)
//! ```

pub mod adapters;
pub mod app;
pub mod config;

pub use app::{exit_code_for, BridgeApp, EXIT_CLEAN, EXIT_FATAL, EXIT_PID_ANOMALY, EXIT_SINGLETON};
pub use config::{BridgeConfig, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
