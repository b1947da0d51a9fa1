//! # Connection Manager - Outbound Host Link
//!
//! ## Purpose
//! Owns the single persistent TCP connection to the visual-programming host.
//! Serializes frames from concurrently running adapter workers, reconnects
//! with exponential backoff, and dispatches decoded inbound commands to
//! registered per-name handlers.
//!
//! ## Architecture Role
//! ```text
//! adapter workers → OutboundHandle (bounded queue) → writer half → host
//! host → reader half → codec → DispatchTable → adapter inbound queues
//! ```
//!
//! ## Guarantees
//! - A frame is written whole by the single link task - frames from
//!   different adapters never interleave on the wire
//! - Per-adapter emission order is preserved through the FIFO queue;
//!   no ordering is promised across adapters
//! - Output emitted while disconnected buffers up to the bounded queue
//!   depth, then drops with a once-per-condition report - never unbounded
//! - A write failure flips the link to `Disconnected` and schedules a
//!   reconnect; adapters keep running either way

use crate::adapter::{CancelToken, CANCEL_CHECK_INTERVAL};
use crate::error::{Result, RuntimeError};
use crate::report::ConditionReporter;
use bytes::BytesMut;
use dashmap::DashMap;
use parking_lot::RwLock;
use rsp_bus::{Bus, BusMessage};
use rsp_codec::{drain_frames, encode_frame, parse_command, Command};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Connection manager tunables
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Host to connect to
    pub host: String,
    /// Remote sensor protocol port
    pub port: u16,
    /// Outbound frame queue depth shared by all adapters
    pub outbound_queue: usize,
    /// Queue depth of each registered inbound handler
    pub handler_queue: usize,
    /// First reconnect delay
    pub reconnect_base: Duration,
    /// Reconnect delay cap
    pub reconnect_max: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 42001,
            outbound_queue: 256,
            handler_queue: 64,
            reconnect_base: Duration::from_millis(100),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

/// Observable state of the host link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Connected and exchanging frames
    Connected,
    /// Link lost, reconnect pending
    Disconnected,
    /// Backoff/connect attempt in progress
    Reconnecting,
}

/// Cloneable, non-blocking producer side of the outbound queue
#[derive(Clone)]
pub struct OutboundHandle {
    tx: mpsc::Sender<Command>,
}

impl OutboundHandle {
    /// Wrap an existing sender (used directly by tests)
    pub fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    /// Enqueue a command without blocking
    ///
    /// Drops are reported through `reporter` once per condition so a long
    /// host outage does not flood the log at poll frequency.
    pub fn send(&self, command: Command, reporter: &ConditionReporter) {
        match self.tx.try_send(command) {
            Ok(()) => reporter.clear("outbound"),
            Err(mpsc::error::TrySendError::Full(cmd)) => {
                reporter.report(
                    "outbound",
                    &format!("outbound queue full, dropping {}", cmd),
                );
            }
            Err(mpsc::error::TrySendError::Closed(cmd)) => {
                reporter.report(
                    "outbound",
                    &format!("connection manager stopped, dropping {}", cmd),
                );
            }
        }
    }
}

/// Name-keyed routing of inbound commands to adapter queues
///
/// Producers (the link task) use `try_send`; a slow adapter loses commands
/// from its own queue without stalling network I/O or other adapters.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: Arc<DashMap<String, mpsc::Sender<Command>>>,
    reporter: Arc<RwLock<Option<ConditionReporter>>>,
}

impl DispatchTable {
    /// Empty table
    pub fn new(reporter: ConditionReporter) -> Self {
        Self {
            handlers: Arc::new(DashMap::new()),
            reporter: Arc::new(RwLock::new(Some(reporter))),
        }
    }

    /// Route commands named `name` into `tx`
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn register(&self, name: &str, tx: mpsc::Sender<Command>) {
        if self.handlers.insert(name.to_string(), tx).is_some() {
            warn!(name, "inbound handler replaced");
        } else {
            debug!(name, "inbound handler registered");
        }
    }

    /// Remove the handler for `name`, if any
    pub fn unregister(&self, name: &str) {
        self.handlers.remove(name);
    }

    /// Deliver a decoded command to the handler matching its name
    pub fn dispatch(&self, command: &Command) {
        match command {
            Command::SensorUpdate { values } => {
                for sv in values {
                    self.deliver(&sv.name, Command::sensor_update(&sv.name, sv.value.clone()));
                }
            }
            Command::Broadcast { event } => {
                self.deliver(event, command.clone());
            }
            Command::Group { name } => {
                // Relay control command; not meaningful on the host link
                warn!(group = %name, "ignoring group command on host connection");
            }
        }
    }

    fn deliver(&self, name: &str, command: Command) {
        let Some(tx) = self.handlers.get(name) else {
            debug!(name, "no handler for inbound command");
            return;
        };
        match tx.try_send(command) {
            Ok(()) => {
                if let Some(reporter) = self.reporter.read().as_ref() {
                    reporter.clear(&format!("dispatch.{name}"));
                }
            }
            Err(e) => {
                if let Some(reporter) = self.reporter.read().as_ref() {
                    reporter.report(
                        &format!("dispatch.{name}"),
                        &format!("inbound queue unavailable: {e}"),
                    );
                }
            }
        }
    }
}

/// Owner of the outbound host link
pub struct ConnectionManager {
    config: ConnectionConfig,
    outbound_tx: mpsc::Sender<Command>,
    dispatch: DispatchTable,
    state: Arc<RwLock<LinkState>>,
    token: CancelToken,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Create the manager and start its link task
    pub fn start(config: ConnectionConfig, bus: Bus) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue);
        let reporter = ConditionReporter::new(format!("host:{}:{}", config.host, config.port));
        let dispatch = DispatchTable::new(reporter.clone());
        let state = Arc::new(RwLock::new(LinkState::Disconnected));
        let token = CancelToken::new();

        let task = tokio::spawn(Self::run(
            config.clone(),
            outbound_rx,
            dispatch.clone(),
            state.clone(),
            bus,
            reporter,
            token.clone(),
        ));

        Self {
            config,
            outbound_tx,
            dispatch,
            state,
            token,
            task: Some(task),
        }
    }

    /// Producer handle for adapter contexts
    pub fn outbound_handle(&self) -> OutboundHandle {
        OutboundHandle::new(self.outbound_tx.clone())
    }

    /// Inbound routing table shared with the adapter runtime
    pub fn dispatch_table(&self) -> DispatchTable {
        self.dispatch.clone()
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        *self.state.read()
    }

    /// Queue depth configured for inbound handlers
    pub fn handler_queue(&self) -> usize {
        self.config.handler_queue
    }

    /// Stop the link task and close the connection
    pub async fn shutdown(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(Duration::from_secs(1), task).await.is_err() {
                warn!("connection task did not stop in time");
            }
        }
        *self.state.write() = LinkState::Disconnected;
        info!("connection manager stopped");
    }

    /// Reconnect loop: connect with backoff, serve until the link drops
    #[instrument(skip_all, fields(host = %config.host, port = config.port))]
    async fn run(
        config: ConnectionConfig,
        mut outbound_rx: mpsc::Receiver<Command>,
        dispatch: DispatchTable,
        state: Arc<RwLock<LinkState>>,
        bus: Bus,
        reporter: ConditionReporter,
        token: CancelToken,
    ) {
        let mut backoff = config.reconnect_base;

        while !token.is_cancelled() {
            *state.write() = LinkState::Reconnecting;
            match TcpStream::connect((config.host.as_str(), config.port)).await {
                Ok(stream) => {
                    info!("connected to host");
                    reporter.clear("connect");
                    *state.write() = LinkState::Connected;
                    backoff = config.reconnect_base;

                    match Self::serve(stream, &mut outbound_rx, &dispatch, &bus, &token).await {
                        Ok(()) => {
                            // Clean shutdown path
                            *state.write() = LinkState::Disconnected;
                            return;
                        }
                        Err(e) => {
                            reporter.report("link", &e.to_string());
                            *state.write() = LinkState::Disconnected;
                        }
                    }
                }
                Err(e) => {
                    reporter.report("connect", &format!("connect failed: {e}"));
                }
            }

            if !token.delay(backoff).await {
                break;
            }
            backoff = (backoff * 2).min(config.reconnect_max);
        }
        *state.write() = LinkState::Disconnected;
    }

    /// Pump one live connection until it fails or the manager stops
    ///
    /// `Ok(())` means cooperative shutdown; any link failure is an `Err`
    /// that sends the caller back into the backoff loop.
    async fn serve(
        stream: TcpStream,
        outbound_rx: &mut mpsc::Receiver<Command>,
        dispatch: &DispatchTable,
        bus: &Bus,
        token: &CancelToken,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let mut buf = BytesMut::with_capacity(4096);

        loop {
            tokio::select! {
                maybe = outbound_rx.recv() => {
                    match maybe {
                        Some(command) => {
                            let frame = encode_frame(&command);
                            writer.write_all(&frame).await?;
                            debug!(command = %command, "frame sent");
                        }
                        None => return Ok(()),
                    }
                }
                read = reader.read_buf(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        return Err(RuntimeError::Connection("host closed the connection".into()));
                    }
                    for frame in drain_frames(&mut buf)? {
                        match parse_command(&frame.payload) {
                            Ok(command) => {
                                debug!(command = %command, "frame received");
                                Self::publish_inbound(bus, &command);
                                dispatch.dispatch(&command);
                            }
                            Err(e) => warn!(error = %e, "dropping malformed inbound command"),
                        }
                    }
                }
                _ = tokio::time::sleep(CANCEL_CHECK_INTERVAL) => {
                    if token.is_cancelled() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn publish_inbound(bus: &Bus, command: &Command) {
        match command {
            Command::SensorUpdate { values } => {
                for sv in values {
                    bus.publish(
                        "host.input",
                        &BusMessage::value(sv.name.clone(), sv.value.clone()),
                    );
                }
            }
            Command::Broadcast { event } => {
                bus.publish("host.input", &BusMessage::event(event.clone()));
            }
            Command::Group { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsp_codec::Value;
    use tokio::net::TcpListener;

    async fn read_commands(stream: &mut TcpStream, expected: usize) -> Vec<Command> {
        let mut buf = BytesMut::new();
        let mut commands = Vec::new();
        while commands.len() < expected {
            let n = stream.read_buf(&mut buf).await.unwrap();
            assert!(n > 0, "host saw EOF early");
            for frame in drain_frames(&mut buf).unwrap() {
                commands.push(parse_command(&frame.payload).unwrap());
            }
        }
        commands
    }

    fn config_for(port: u16) -> ConnectionConfig {
        ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..ConnectionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_frames_from_concurrent_producers_arrive_whole_and_ordered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut manager = ConnectionManager::start(config_for(port), Bus::new());
        let (mut host_side, _) = listener.accept().await.unwrap();

        let reporter = ConditionReporter::new("test");
        let handle_a = manager.outbound_handle();
        let handle_b = manager.outbound_handle();
        let rep_a = reporter.clone();
        let rep_b = reporter.clone();

        let task_a = tokio::spawn(async move {
            for i in 0..20 {
                handle_a.send(Command::sensor_update("a", i as f64), &rep_a);
                tokio::task::yield_now().await;
            }
        });
        let task_b = tokio::spawn(async move {
            for i in 0..20 {
                handle_b.send(Command::sensor_update("b", i as f64), &rep_b);
                tokio::task::yield_now().await;
            }
        });
        task_a.await.unwrap();
        task_b.await.unwrap();

        let commands = read_commands(&mut host_side, 40).await;
        assert_eq!(commands.len(), 40);

        // Every frame decoded cleanly (no interleaving) and each producer's
        // own sequence arrived in emission order.
        let sequence_of = |name: &str| -> Vec<f64> {
            commands
                .iter()
                .filter_map(|c| match c {
                    Command::SensorUpdate { values } if values[0].name == name => {
                        match values[0].value {
                            Value::Number(n) => Some(n),
                            _ => None,
                        }
                    }
                    _ => None,
                })
                .collect()
        };
        let expected: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert_eq!(sequence_of("a"), expected);
        assert_eq!(sequence_of("b"), expected);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_inbound_commands_reach_registered_handler() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut manager = ConnectionManager::start(config_for(port), Bus::new());
        let (mut host_side, _) = listener.accept().await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        manager.dispatch_table().register("motor", tx);

        host_side
            .write_all(&encode_frame(&Command::sensor_update("motor", 7.0)))
            .await
            .unwrap();
        host_side
            .write_all(&encode_frame(&Command::broadcast("motor")))
            .await
            .unwrap();
        // A name nobody registered is silently dropped
        host_side
            .write_all(&encode_frame(&Command::broadcast("unrelated")))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first, Command::sensor_update("motor", 7.0));
        let second = rx.recv().await.unwrap();
        assert_eq!(second, Command::broadcast("motor"));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_while_disconnected_drops_with_single_report() {
        // Port from a listener we immediately drop - nothing is accepting.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = config_for(port);
        config.outbound_queue = 2;
        let mut manager = ConnectionManager::start(config, Bus::new());

        let reporter = ConditionReporter::new("test");
        let handle = manager.outbound_handle();
        for i in 0..10 {
            handle.send(Command::sensor_update("x", i as f64), &reporter);
        }
        // Queue holds 2, the rest dropped; the drop condition is raised once
        assert!(reporter.is_raised("outbound"));

        manager.shutdown().await;
    }
}
