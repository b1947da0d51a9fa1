//! Daemon assembly and lifecycle
//!
//! Startup order matters: the singleton guard runs before any socket is
//! bound so a second instance exits without side effects, and the guard is
//! released last so the pid file stays valid for the whole lifetime.

use crate::adapters::register_builtins;
use crate::config::BridgeConfig;
use anyhow::{Context, Result};
use rsp_bus::Bus;
use rsp_relay::{GroupRelayServer, RelayConfig};
use rsp_runtime::{AdapterRuntime, ConnectionConfig, ConnectionManager, FactoryRegistry, ParameterSet};
use rsp_singleton::{SingletonError, SingletonGuard};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

/// Clean shutdown
pub const EXIT_CLEAN: i32 = 0;
/// PID file records our own pid at startup
pub const EXIT_PID_ANOMALY: i32 = 19;
/// Another live instance holds the pid file
pub const EXIT_SINGLETON: i32 = 20;
/// Any other fatal startup failure
pub const EXIT_FATAL: i32 = 3;

/// Map a startup error chain to the daemon's exit code
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<SingletonError>() {
        Some(SingletonError::AlreadyRunning { .. }) => EXIT_SINGLETON,
        Some(SingletonError::PidFileCorrupt { .. }) => EXIT_PID_ANOMALY,
        _ => EXIT_FATAL,
    }
}

/// A fully wired, running bridge
pub struct BridgeApp {
    guard: SingletonGuard,
    connection: ConnectionManager,
    runtime: Arc<AdapterRuntime>,
    relay_task: Option<JoinHandle<()>>,
    bus: Bus,
}

impl BridgeApp {
    /// Bring the daemon up from a loaded configuration
    #[instrument(skip(config), fields(host = %config.host.address, port = config.host.port))]
    pub async fn start(config: BridgeConfig) -> Result<Self> {
        let guard = SingletonGuard::new(&config.daemon.pid_file);
        guard.start().context("claiming pid file")?;

        let bus = Bus::new();
        let connection = ConnectionManager::start(
            ConnectionConfig {
                host: config.host.address.clone(),
                port: config.host.port,
                outbound_queue: config.host.outbound_queue,
                handler_queue: config.host.handler_queue,
                ..ConnectionConfig::default()
            },
            bus.clone(),
        );

        let mut registry = FactoryRegistry::new();
        register_builtins(&mut registry);

        let runtime = Arc::new(AdapterRuntime::new(
            registry,
            connection.outbound_handle(),
            connection.dispatch_table(),
            connection.handler_queue(),
            bus.clone(),
        ));

        for instance in &config.adapters {
            let params: ParameterSet = instance.params.clone().into_iter().collect();
            runtime
                .configure(&instance.adapter_type, &instance.name, params)
                .await
                .with_context(|| format!("configuring adapter {:?}", instance.name))?;
            // A bad parameter set disables the instance, never the daemon
            if let Err(e) = runtime.activate(&instance.name).await {
                warn!(adapter = %instance.name, error = %e, "activation failed, left configured");
            }
        }
        info!(active = runtime.active_count().await, "adapters started");

        let relay_task = if config.relay.enabled {
            let relay_config = RelayConfig {
                bind_addr: format!("0.0.0.0:{}", config.relay.port),
                write_timeout: config.relay.write_timeout(),
                ..RelayConfig::default()
            };
            let server = GroupRelayServer::bind(relay_config)
                .await
                .context("binding relay port")?;
            Some(tokio::spawn(server.run()))
        } else {
            None
        };

        Ok(Self {
            guard,
            connection,
            runtime,
            relay_task,
            bus,
        })
    }

    /// Shared message bus, for embedding callers
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Adapter runtime handle
    pub fn runtime(&self) -> &Arc<AdapterRuntime> {
        &self.runtime
    }

    /// Orderly teardown: adapters first, then the link, then the pid file
    pub async fn shutdown(mut self) {
        info!("shutting down");
        self.runtime.shutdown().await;
        self.connection.shutdown().await;
        if let Some(relay) = self.relay_task.take() {
            relay.abort();
            let _ = relay.await;
        }
        self.guard.stop();
        info!("shutdown complete");
    }
}

/// Run until interrupted, then tear down; returns the process exit code
pub async fn run(config: BridgeConfig) -> i32 {
    let app = match BridgeApp::start(config).await {
        Ok(app) => app,
        Err(e) => {
            let code = exit_code_for(&e);
            error!(error = ?e, code, "startup failed");
            return code;
        }
    };

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received"),
        Err(e) => error!(error = %e, "signal handler failed"),
    }
    app.shutdown().await;
    EXIT_CLEAN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_map_singleton_errors() {
        let running = anyhow::Error::new(SingletonError::AlreadyRunning { pid: 4242 });
        assert_eq!(exit_code_for(&running), EXIT_SINGLETON);

        let corrupt = anyhow::Error::new(SingletonError::PidFileCorrupt {
            path: "/tmp/x.pid".into(),
            pid: 1,
        });
        assert_eq!(exit_code_for(&corrupt), EXIT_PID_ANOMALY);

        let other = anyhow::anyhow!("no config file");
        assert_eq!(exit_code_for(&other), EXIT_FATAL);
    }

    #[tokio::test]
    async fn test_bridge_starts_and_stops_without_host() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig {
            daemon: crate::config::DaemonConfig {
                pid_file: dir.path().join("bridge.pid"),
            },
            ..toml::from_str("").unwrap()
        };

        // No host is listening on the loopback port; the connection manager
        // keeps retrying in the background and startup still succeeds.
        let app = BridgeApp::start(config).await.expect("startup");
        assert_eq!(app.runtime().active_count().await, 0);
        app.shutdown().await;
        assert!(!dir.path().join("bridge.pid").exists());
    }

    #[tokio::test]
    async fn test_live_foreign_pid_blocks_startup() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("bridge.pid");
        // pid 1 is always alive
        std::fs::write(&pid_file, "1").unwrap();

        let config = BridgeConfig {
            daemon: crate::config::DaemonConfig { pid_file },
            ..toml::from_str("").unwrap()
        };
        let Err(err) = BridgeApp::start(config).await else {
            panic!("startup must fail while another instance runs");
        };
        assert_eq!(exit_code_for(&err), EXIT_SINGLETON);
    }

    #[tokio::test]
    async fn test_own_pid_in_file_is_reported_as_anomaly() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("bridge.pid");
        std::fs::write(&pid_file, std::process::id().to_string()).unwrap();

        let config = BridgeConfig {
            daemon: crate::config::DaemonConfig { pid_file },
            ..toml::from_str("").unwrap()
        };
        let Err(err) = BridgeApp::start(config).await else {
            panic!("startup must fail on a pid file recording our own pid");
        };
        assert_eq!(exit_code_for(&err), EXIT_PID_ANOMALY);
    }
}
