//! `rsp-bridge` daemon entry point

use clap::Parser;
use rsp_bridge::{app, BridgeConfig, EXIT_FATAL};
use std::path::PathBuf;
use tracing::error;

#[derive(Parser, Debug)]
#[command(
    name = "rsp-bridge",
    about = "Adapter bridge daemon for remote sensor protocol hosts"
)]
struct Args {
    /// Config file path (overrides RSP_BRIDGE_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines instead of human-readable text
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.log_json);

    let path = BridgeConfig::resolve_path(args.config);
    let config = match BridgeConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            error!(error = ?e, path = %path.display(), "cannot load configuration");
            std::process::exit(EXIT_FATAL);
        }
    };

    let code = app::run(config).await;
    std::process::exit(code);
}
