//! # RSP Relay - Group Frame Forwarding
//!
//! ## Purpose
//! Accepts many concurrent RSP connections, groups them by a declared name,
//! and forwards every subsequent frame verbatim to the *other* members of
//! the same group - never back to the sender. Used to couple several hosts
//! or bridges into one shared sensor namespace.
//!
//! ## Message Flow
//! 1. Client connects and must first send `group "<name>"`
//! 2. Every later frame from that client is relayed unmodified to the other
//!    current members of `<name>`
//! 3. Members are removed on disconnect or write failure; a group vanishes
//!    with its last member
//!
//! ## Delivery Guarantees
//! Best-effort and transient: no history, no replay, late joiners see
//! nothing sent before they joined. Delivery order within one group follows
//! arrival order at the server. Each member sits behind a bounded queue and
//! a write timeout, so one slow consumer is disconnected instead of
//! stalling the rest.

pub mod server;

pub use server::{GroupRelayServer, RelayConfig};
