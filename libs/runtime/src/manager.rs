//! # Adapter Runtime - Lifecycle Manager
//!
//! ## Purpose
//! Owns every configured adapter instance and drives the lifecycle
//! `Configured → Active ⇄ Inactive → Destroyed`. One tokio task per active
//! adapter, created on activation and fully joined on deactivation - a
//! worker never outlives its adapter's `deactivate()` call, so
//! re-activation cannot race a still-exiting worker.
//!
//! ## Activation
//! Activation validates the parameter set against the adapter type's
//! mandatory keys first; a failed validation leaves the adapter in its
//! previous state and the rest of the runtime untouched. On success the
//! runtime wires the worker context: cancellation token, outbound handle,
//! bus access, and - for inbound-capable adapters - a bounded command queue
//! registered with the connection manager's dispatch table.

use crate::adapter::{Adapter, AdapterContext, CancelToken};
use crate::connection::{DispatchTable, OutboundHandle};
use crate::error::{Result, RuntimeError};
use crate::params::ParameterSet;
use crate::registry::FactoryRegistry;
use rsp_bus::Bus;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bounded join grace on deactivation
const JOIN_GRACE: Duration = Duration::from_secs(1);

/// Lifecycle state of one adapter instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Parameters stored, never activated
    Configured,
    /// Worker task running
    Active,
    /// Deactivated after at least one activation
    Inactive,
}

struct AdapterEntry {
    adapter: Arc<dyn Adapter>,
    params: ParameterSet,
    state: AdapterState,
    token: Option<CancelToken>,
    worker: Option<JoinHandle<()>>,
    inbound_names: Vec<String>,
}

/// Owns all adapter instances and their workers
pub struct AdapterRuntime {
    registry: FactoryRegistry,
    outbound: OutboundHandle,
    dispatch: DispatchTable,
    handler_queue: usize,
    bus: Bus,
    adapters: Mutex<HashMap<String, AdapterEntry>>,
}

impl AdapterRuntime {
    /// Build the runtime around an existing connection manager's handles
    pub fn new(
        registry: FactoryRegistry,
        outbound: OutboundHandle,
        dispatch: DispatchTable,
        handler_queue: usize,
        bus: Bus,
    ) -> Self {
        Self {
            registry,
            outbound,
            dispatch,
            handler_queue,
            bus,
            adapters: Mutex::new(HashMap::new()),
        }
    }

    /// Create and store an adapter instance
    ///
    /// Applies the type's parameter defaults; mandatory-key validation is
    /// deferred to activation so an operator can configure incrementally.
    pub async fn configure(
        &self,
        type_name: &str,
        instance_name: &str,
        mut params: ParameterSet,
    ) -> Result<()> {
        let adapter = self.registry.create(type_name)?;
        params.apply_defaults(adapter.default_parameters());

        let mut adapters = self.adapters.lock().await;
        if adapters.contains_key(instance_name) {
            return Err(RuntimeError::Configuration(format!(
                "adapter {:?} is already configured",
                instance_name
            )));
        }
        adapters.insert(
            instance_name.to_string(),
            AdapterEntry {
                adapter,
                params,
                state: AdapterState::Configured,
                token: None,
                worker: None,
                inbound_names: Vec::new(),
            },
        );
        info!(adapter = instance_name, r#type = type_name, "adapter configured");
        Ok(())
    }

    /// Validate parameters and start the adapter's worker
    pub async fn activate(&self, name: &str) -> Result<()> {
        let mut adapters = self.adapters.lock().await;
        let entry = adapters
            .get_mut(name)
            .ok_or_else(|| RuntimeError::UnknownAdapter(name.to_string()))?;

        if entry.state == AdapterState::Active {
            return Err(RuntimeError::AlreadyActive(name.to_string()));
        }
        entry
            .params
            .validate(name, entry.adapter.mandatory_parameters())?;

        // Inbound-capable adapters get one queue shared across their names
        let inbound_names = entry.adapter.inbound_names(&entry.params);
        let inbound_rx = if inbound_names.is_empty() {
            None
        } else {
            let (tx, rx) = mpsc::channel(self.handler_queue);
            for inbound in &inbound_names {
                self.dispatch.register(inbound, tx.clone());
            }
            Some(rx)
        };
        entry.inbound_names = inbound_names;

        let token = CancelToken::new();
        let ctx = AdapterContext::new(
            name.to_string(),
            entry.params.clone(),
            token.clone(),
            self.outbound.clone(),
            self.bus.clone(),
            inbound_rx,
        );

        let adapter = Arc::clone(&entry.adapter);
        let worker_name = name.to_string();
        let worker = tokio::spawn(async move {
            debug!(adapter = %worker_name, "worker started");
            adapter.run(ctx).await;
            debug!(adapter = %worker_name, "worker exited");
        });

        entry.token = Some(token);
        entry.worker = Some(worker);
        entry.state = AdapterState::Active;
        info!(adapter = name, "adapter activated");
        Ok(())
    }

    /// Stop the adapter's worker and wait for it to exit
    ///
    /// Synchronous in effect: when this returns, no worker for `name` is
    /// running. Deactivating an already-inactive adapter is a no-op.
    pub async fn deactivate(&self, name: &str) -> Result<()> {
        let mut adapters = self.adapters.lock().await;
        let entry = adapters
            .get_mut(name)
            .ok_or_else(|| RuntimeError::UnknownAdapter(name.to_string()))?;

        if entry.state != AdapterState::Active {
            debug!(adapter = name, "deactivate: not active");
            return Ok(());
        }

        if let Some(token) = entry.token.take() {
            token.cancel();
        }
        for inbound in entry.inbound_names.drain(..) {
            self.dispatch.unregister(&inbound);
        }

        if let Some(mut worker) = entry.worker.take() {
            match tokio::time::timeout(JOIN_GRACE, &mut worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(adapter = name, error = %e, "worker ended abnormally"),
                Err(_) => {
                    // The cancellable-delay contract bounds stop latency, so
                    // a missed join means the adapter body is stuck in
                    // foreign code; abort rather than leak the task.
                    warn!(adapter = name, "no timely join, aborting worker");
                    worker.abort();
                    let _ = worker.await;
                }
            }
        }

        entry.state = AdapterState::Inactive;
        info!(adapter = name, "adapter deactivated");
        Ok(())
    }

    /// Deactivate (if needed) and forget an adapter instance
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.deactivate(name).await?;
        let mut adapters = self.adapters.lock().await;
        adapters.remove(name);
        info!(adapter = name, "adapter removed");
        Ok(())
    }

    /// Current state of an adapter, if configured
    pub async fn state(&self, name: &str) -> Option<AdapterState> {
        self.adapters.lock().await.get(name).map(|e| e.state)
    }

    /// Number of adapters with a live worker
    pub async fn active_count(&self) -> usize {
        self.adapters
            .lock()
            .await
            .values()
            .filter(|e| e.state == AdapterState::Active)
            .count()
    }

    /// Configured adapter names
    pub async fn adapter_names(&self) -> Vec<String> {
        self.adapters.lock().await.keys().cloned().collect()
    }

    /// Deactivate every adapter
    ///
    /// Part of whole-process shutdown; the caller closes the connection
    /// manager afterwards.
    pub async fn shutdown(&self) {
        let names = self.adapter_names().await;
        for name in names {
            if let Err(e) = self.deactivate(&name).await {
                warn!(adapter = %name, error = %e, "deactivation failed during shutdown");
            }
        }
        info!("adapter runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Poll-loop adapter used across the lifecycle tests
    struct PollAdapter {
        iterations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Adapter for PollAdapter {
        fn type_name(&self) -> &'static str {
            "poll"
        }
        fn mandatory_parameters(&self) -> &'static [&'static str] {
            &["poll.interval"]
        }
        async fn run(&self, ctx: AdapterContext) {
            let interval = ctx
                .params()
                .get_duration_secs("poll.interval")
                .ok()
                .flatten()
                .unwrap_or(Duration::from_secs(1));
            while ctx.is_active() {
                self.iterations.fetch_add(1, Ordering::SeqCst);
                ctx.send_value(self.iterations.load(Ordering::SeqCst) as f64);
                if !ctx.cancellable_delay(interval).await {
                    break;
                }
            }
        }
    }

    fn test_runtime(iterations: Arc<AtomicUsize>) -> (AdapterRuntime, mpsc::Receiver<rsp_codec::Command>) {
        let (tx, rx) = mpsc::channel(64);
        let mut registry = FactoryRegistry::new();
        registry.register("poll", move || {
            Arc::new(PollAdapter {
                iterations: iterations.clone(),
            }) as Arc<dyn Adapter>
        });
        let runtime = AdapterRuntime::new(
            registry,
            OutboundHandle::new(tx),
            DispatchTable::default(),
            16,
            Bus::new(),
        );
        (runtime, rx)
    }

    #[tokio::test]
    async fn test_missing_mandatory_key_fails_activation() {
        let (runtime, _rx) = test_runtime(Arc::new(AtomicUsize::new(0)));
        runtime
            .configure("poll", "sensor-1", ParameterSet::new())
            .await
            .unwrap();

        let err = runtime.activate("sensor-1").await.unwrap_err();
        match err {
            RuntimeError::MissingParameters { adapter, missing } => {
                assert_eq!(adapter, "sensor-1");
                assert_eq!(missing, vec!["poll.interval"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Activation aborted before any worker was spawned
        assert_eq!(runtime.active_count().await, 0);
        assert_eq!(
            runtime.state("sensor-1").await,
            Some(AdapterState::Configured)
        );
    }

    #[tokio::test]
    async fn test_activate_deactivate_round_trip() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let (runtime, mut rx) = test_runtime(iterations.clone());

        let params: ParameterSet = [("poll.interval", "0.01")].into_iter().collect();
        runtime.configure("poll", "sensor-1", params).await.unwrap();

        runtime.activate("sensor-1").await.unwrap();
        assert_eq!(runtime.active_count().await, 1);
        assert!(matches!(
            runtime.activate("sensor-1").await,
            Err(RuntimeError::AlreadyActive(_))
        ));

        // The worker is actually polling and emitting
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, rsp_codec::Command::SensorUpdate { .. }));

        runtime.deactivate("sensor-1").await.unwrap();
        assert_eq!(runtime.active_count().await, 0);
        let after = iterations.load(Ordering::SeqCst);

        // No worker outlives deactivation
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(iterations.load(Ordering::SeqCst), after);

        // Re-activation is legal and spawns a fresh worker
        runtime.activate("sensor-1").await.unwrap();
        assert_eq!(runtime.active_count().await, 1);
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_deactivate_latency_is_bounded_by_check_granularity() {
        let (runtime, _rx) = test_runtime(Arc::new(AtomicUsize::new(0)));
        // A 10 second poll interval must not delay deactivation
        let params: ParameterSet = [("poll.interval", "10")].into_iter().collect();
        runtime.configure("poll", "slow", params).await.unwrap();
        runtime.activate("slow").await.unwrap();

        // Let the worker settle into its delay
        tokio::time::sleep(Duration::from_millis(30)).await;

        let start = Instant::now();
        runtime.deactivate("slow").await.unwrap();
        let elapsed = start.elapsed();
        assert!(
            elapsed < Duration::from_millis(500),
            "deactivate took {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_configure_rejects_duplicate_names() {
        let (runtime, _rx) = test_runtime(Arc::new(AtomicUsize::new(0)));
        runtime
            .configure("poll", "dup", ParameterSet::new())
            .await
            .unwrap();
        assert!(matches!(
            runtime.configure("poll", "dup", ParameterSet::new()).await,
            Err(RuntimeError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_joins_every_adapter() {
        let (runtime, _rx) = test_runtime(Arc::new(AtomicUsize::new(0)));
        for name in ["a", "b", "c"] {
            let params: ParameterSet = [("poll.interval", "0.02")].into_iter().collect();
            runtime.configure("poll", name, params).await.unwrap();
            runtime.activate(name).await.unwrap();
        }
        assert_eq!(runtime.active_count().await, 3);

        runtime.shutdown().await;
        assert_eq!(runtime.active_count().await, 0);
    }
}
