//! Group relay server implementation
//!
//! One reader task per accepted connection plus one writer task per group
//! member. Frames cross between them as raw wire bytes - the command layer
//! is only consulted for the initial `group` join frame, everything after
//! that is forwarded verbatim.

use bytes::BytesMut;
use dashmap::DashMap;
use rsp_codec::{drain_frames, parse_command, Command, Frame};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Relay server tunables
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address, e.g. `0.0.0.0:42002`
    pub bind_addr: String,
    /// Bound on any single relay write (queue hand-off and socket write)
    pub write_timeout: Duration,
    /// Outbound queue depth per member
    pub member_queue: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:42002".to_string(),
            write_timeout: Duration::from_secs(2),
            member_queue: 64,
        }
    }
}

/// One group member's delivery endpoint
///
/// Holding only the queue sender here keeps the registry lock-free on the
/// socket: actual writes happen in the member's own writer task.
#[derive(Clone)]
struct Member {
    id: u64,
    tx: mpsc::Sender<Vec<u8>>,
}

type Registry = Arc<DashMap<String, HashMap<u64, Member>>>;

/// Multi-client group relay server
pub struct GroupRelayServer {
    config: RelayConfig,
    listener: TcpListener,
    registry: Registry,
    next_id: Arc<AtomicU64>,
}

impl GroupRelayServer {
    /// Bind the listening socket
    pub async fn bind(config: RelayConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!(addr = %config.bind_addr, "group relay listening");
        Ok(Self {
            config,
            listener,
            registry: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Actual bound address (relevant when binding port 0)
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop; runs until the surrounding task is dropped
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let registry = Arc::clone(&self.registry);
                    let config = self.config.clone();
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(async move {
                        handle_connection(stream, peer, id, registry, config).await;
                    });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    }
}

/// Per-connection reader: join handshake, then relay loop
///
/// The first frame must be a `group "<name>"` command; anything else closes
/// the connection. Every later frame is forwarded verbatim to the other
/// members of that group.
#[instrument(skip(stream, registry, config), fields(peer = %peer, conn = id))]
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: u64,
    registry: Registry,
    config: RelayConfig,
) {
    info!("connection established");
    let (mut reader, writer) = stream.into_split();
    // Moved into the member's writer task once the join handshake succeeds
    let mut writer = Some(writer);

    let mut buf = BytesMut::with_capacity(1024);
    let mut membership: Option<String> = None;

    'conn: loop {
        let n = match reader.read_buf(&mut buf).await {
            Ok(0) => {
                info!("connection closed by peer");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "read failed");
                break;
            }
        };
        debug!(bytes = n, "data received");

        let frames = match drain_frames(&mut buf) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(error = %e, "protocol violation, closing connection");
                break;
            }
        };

        for frame in frames {
            match &membership {
                None => {
                    let group = match join_group_name(&frame) {
                        Some(group) => group,
                        None => {
                            warn!("first frame is not a group join, closing");
                            break 'conn;
                        }
                    };
                    let (tx, rx) = mpsc::channel(config.member_queue);
                    let w = match writer.take() {
                        Some(w) => w,
                        None => break 'conn,
                    };
                    tokio::spawn(member_writer(rx, w, config.write_timeout, id));
                    registry
                        .entry(group.clone())
                        .or_default()
                        .insert(id, Member { id, tx });
                    info!(group = %group, "member joined");
                    membership = Some(group);
                }
                Some(group) => {
                    relay_frame(&registry, group, id, &frame, &config).await;
                }
            }
        }
    }

    if let Some(group) = membership {
        remove_member(&registry, &group, id);
    }
}

/// Extract the group name if the frame is a valid join command
fn join_group_name(frame: &Frame) -> Option<String> {
    match parse_command(&frame.payload) {
        Ok(Command::Group { name }) => Some(name),
        _ => None,
    }
}

/// Forward one frame to every other current member of `group`
///
/// A member whose queue hand-off times out or whose channel is closed is
/// removed on the spot - concurrent leave is expected, not an error.
async fn relay_frame(
    registry: &Registry,
    group: &str,
    sender_id: u64,
    frame: &Frame,
    config: &RelayConfig,
) {
    // Snapshot the membership so the shard lock is not held across awaits
    let targets: Vec<Member> = match registry.get(group) {
        Some(members) => members
            .values()
            .filter(|m| m.id != sender_id)
            .cloned()
            .collect(),
        None => return,
    };

    let wire = frame.to_wire();
    for member in targets {
        match tokio::time::timeout(config.write_timeout, member.tx.send(wire.clone())).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                // Writer task died on a write failure; drop the membership
                // now instead of waiting for the peer's reader half to close
                debug!(conn = member.id, "member queue closed, dropping member");
                remove_member(registry, group, member.id);
            }
            Err(_) => {
                warn!(conn = member.id, "relay write timed out, dropping member");
                remove_member(registry, group, member.id);
            }
        }
    }
}

fn remove_member(registry: &Registry, group: &str, id: u64) {
    let emptied = match registry.get_mut(group) {
        Some(mut members) => {
            members.remove(&id);
            members.is_empty()
        }
        None => false,
    };
    if emptied {
        registry.remove_if(group, |_, members| members.is_empty());
        info!(group, "group destroyed");
    } else {
        debug!(group, conn = id, "member removed");
    }
}


/// Writer task: drains the member queue onto the socket
///
/// Each socket write is bounded by the configured timeout; a failed or
/// timed-out write ends the task, which closes the channel and lets the
/// relay path clean up the membership.
async fn member_writer(
    mut rx: mpsc::Receiver<Vec<u8>>,
    mut writer: OwnedWriteHalf,
    timeout: Duration,
    conn: u64,
) {
    while let Some(bytes) = rx.recv().await {
        match tokio::time::timeout(timeout, writer.write_all(&bytes)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(conn, error = %e, "member write failed");
                break;
            }
            Err(_) => {
                warn!(conn, "member write timed out");
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
}
