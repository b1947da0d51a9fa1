//! Standalone group relay daemon
//!
//! Binds the relay port and serves group traffic until killed. The bridge
//! daemon can embed the same server; this binary exists for deployments
//! that run the relay on its own host.

use anyhow::Result;
use clap::Parser;
use rsp_relay::{GroupRelayServer, RelayConfig};
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rsp-relay", about = "Group relay server for sensor protocol clients")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:42002")]
    bind: String,

    /// Per-write timeout in milliseconds before a slow member is dropped
    #[arg(long, default_value_t = 2000)]
    write_timeout_ms: u64,

    /// Outbound queue depth per member
    #[arg(long, default_value_t = 64)]
    member_queue: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = RelayConfig {
        bind_addr: args.bind,
        write_timeout: Duration::from_millis(args.write_timeout_ms),
        member_queue: args.member_queue,
    };

    let server = GroupRelayServer::bind(config).await?;
    info!(addr = %server.local_addr()?, "relay started");

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }
    Ok(())
}
