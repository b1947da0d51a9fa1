//! Adapter contract and worker-side context
//!
//! An adapter is a pluggable unit that polls or listens to one data source
//! and emits protocol frames. The runtime owns the lifecycle; the adapter
//! body only implements [`Adapter::run`] as a loop of the shape
//! "while active: cancellable wait, compute, emit". Hardware-facing bodies
//! (GPIO, I2C, HTTP pollers) live outside this crate and plug in through
//! this trait.

use crate::connection::OutboundHandle;
use crate::params::ParameterSet;
use crate::report::ConditionReporter;
use async_trait::async_trait;
use parking_lot::Mutex;
use rsp_bus::{Bus, BusMessage};
use rsp_codec::{Command, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Granularity of cancellation checks inside bounded sleeps
///
/// Stop latency is bounded by this value no matter how long the configured
/// poll interval is.
pub const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Cooperative cancellation flag observed inside bounded sleeps
///
/// Workers are never terminated forcibly mid-iteration; they observe this
/// token inside [`AdapterContext::cancellable_delay`] and exit their loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in [`CANCEL_CHECK_INTERVAL`] increments
    ///
    /// Returns `false` if cancellation was observed before the full
    /// duration elapsed.
    pub async fn delay(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            if self.is_cancelled() {
                return false;
            }
            let step = remaining.min(CANCEL_CHECK_INTERVAL);
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
        !self.is_cancelled()
    }
}

/// Capability interface every adapter type implements
///
/// Instances are created by a registered factory (explicit name → factory
/// lookup, no reflection) and stay stateless between activations; per-run
/// state lives on the worker's stack.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Adapter type name as used in the factory registry
    fn type_name(&self) -> &'static str;

    /// Parameter keys that must be present before activation
    fn mandatory_parameters(&self) -> &'static [&'static str] {
        &[]
    }

    /// Default values merged into the parameter set at configuration time
    fn default_parameters(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// Host-side names this adapter wants delivered to its inbound queue
    ///
    /// Empty for output-only adapters. Non-empty makes the runtime register
    /// the names with the connection manager's dispatch table and expose the
    /// receiving end via [`AdapterContext::take_inbound`].
    fn inbound_names(&self, _params: &ParameterSet) -> Vec<String> {
        Vec::new()
    }

    /// Worker entry point; runs on its own task until cancellation
    ///
    /// Per-iteration failures must be absorbed here (report via
    /// [`AdapterContext::report`] and keep polling); returning ends the
    /// worker.
    async fn run(&self, ctx: AdapterContext);
}

/// Worker-side view of the runtime
///
/// Owns everything a worker needs: the cancellation token, the configured
/// parameters, the outbound send primitives and the deduplicating error
/// reporter. Cloneable so helper tasks inside an adapter can share it.
#[derive(Clone)]
pub struct AdapterContext {
    name: String,
    output_name: String,
    event_name: String,
    params: ParameterSet,
    token: CancelToken,
    outbound: OutboundHandle,
    bus: Bus,
    reporter: ConditionReporter,
    inbound: Arc<Mutex<Option<mpsc::Receiver<Command>>>>,
}

impl AdapterContext {
    pub(crate) fn new(
        name: String,
        params: ParameterSet,
        token: CancelToken,
        outbound: OutboundHandle,
        bus: Bus,
        inbound: Option<mpsc::Receiver<Command>>,
    ) -> Self {
        let output_name = params.get_or("output.name", &name).to_string();
        let event_name = params.get_or("event.name", &name).to_string();
        let reporter = ConditionReporter::new(name.clone());
        Self {
            name,
            output_name,
            event_name,
            params,
            token,
            outbound,
            bus,
            reporter,
            inbound: Arc::new(Mutex::new(inbound)),
        }
    }

    /// Adapter instance name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration snapshot taken at activation
    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    /// Whether the worker should keep running
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Bounded-latency sleep; returns `false` once deactivation is pending
    pub async fn cancellable_delay(&self, duration: Duration) -> bool {
        self.token.delay(duration).await
    }

    /// Emit a sensor-update frame under this adapter's output name
    ///
    /// Non-blocking: while the host link is down or the outbound queue is
    /// full the value is dropped and the drop reported once per condition.
    pub fn send_value(&self, value: impl Into<Value>) {
        let value = value.into();
        self.bus.publish(
            "host.output",
            &BusMessage::value(self.output_name.clone(), value.clone()),
        );
        self.outbound
            .send(Command::sensor_update(&self.output_name, value), &self.reporter);
    }

    /// Emit a zero-payload broadcast frame under this adapter's event name
    pub fn send_broadcast(&self) {
        self.bus
            .publish("host.output", &BusMessage::event(self.event_name.clone()));
        self.outbound
            .send(Command::broadcast(&self.event_name), &self.reporter);
    }

    /// Report a per-iteration failure, deduplicated per `slot`
    pub fn report(&self, slot: &str, condition: &str) {
        self.reporter.report(slot, condition);
    }

    /// Mark a previously reported condition as recovered
    pub fn clear(&self, slot: &str) {
        self.reporter.clear(slot);
    }

    /// Take the inbound command queue (inbound-capable adapters only)
    ///
    /// The producing side is the connection manager's non-blocking dispatch;
    /// consuming with a timeout keeps the worker responsive to cancellation.
    /// Can be taken once; subsequent calls return `None`.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<Command>> {
        self.inbound.lock().take()
    }
}
