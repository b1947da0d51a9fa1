//! # RSP Runtime - Adapter Lifecycle and Host Connection
//!
//! ## Purpose
//!
//! Concurrency and lifecycle framework of the RSP bridge: runs many
//! independent polling units ("adapters") against a single shared outbound
//! connection to the visual-programming host.
//!
//! ## Integration Points
//!
//! - **Adapter contract**: external collaborators implement [`Adapter`] and
//!   register a factory; hardware bodies (GPIO, I2C, HTTP pollers) live in
//!   their own crates
//! - **Wire format**: framing and grammar come from `rsp-codec`
//! - **Fan-out**: observable traffic is mirrored onto an `rsp-bus` instance
//!   (`host.output` / `host.input` topics) for optional subsystems
//!
//! ## Architecture Role
//!
//! ```text
//! adapter workers → send_value/send_broadcast → codec → ConnectionManager → host
//! host traffic    → ConnectionManager → codec → DispatchTable → adapter queues
//! ```
//!
//! ## Concurrency Model
//!
//! One tokio task per active adapter plus one link task owned by the
//! connection manager. Deactivation is synchronous: it cancels the worker's
//! token and joins the task (bounded) before returning. Stop latency is
//! bounded by [`CANCEL_CHECK_INTERVAL`](adapter::CANCEL_CHECK_INTERVAL)
//! regardless of configured poll intervals. There is no global lock: the
//! outbound write path, the dispatch table and the adapter table each guard
//! themselves.

pub mod adapter;
pub mod connection;
pub mod error;
pub mod manager;
pub mod params;
pub mod registry;
pub mod report;

pub use adapter::{Adapter, AdapterContext, CancelToken, CANCEL_CHECK_INTERVAL};
pub use connection::{
    ConnectionConfig, ConnectionManager, DispatchTable, LinkState, OutboundHandle,
};
pub use error::{Result, RuntimeError};
pub use manager::{AdapterRuntime, AdapterState};
pub use params::ParameterSet;
pub use registry::{AdapterFactory, FactoryRegistry};
pub use report::ConditionReporter;
