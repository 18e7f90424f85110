//! tandem-server
//!
//! Serves collaborative pads over WebSocket.
//!
//! ```text
//! tandem-server --bind 127.0.0.1:9090 --data-dir ./tandem_data
//! tandem-server --memory
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use env_logger::Env;

use tandem_collab::{open_storage, CollabServer, ServerConfig};

/// Real-time collaborative plain-text pads.
#[derive(Parser)]
#[command(name = "tandem-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "TANDEM_BIND", default_value = "127.0.0.1:9090")]
    bind: String,

    /// RocksDB directory
    #[arg(long, env = "TANDEM_DATA_DIR", default_value = "tandem_data")]
    data_dir: PathBuf,

    /// Keep everything in memory (nothing survives a restart)
    #[arg(long, env = "TANDEM_MEMORY", conflicts_with = "data_dir")]
    memory: bool,

    /// Take client addresses from X-Forwarded-For
    #[arg(long, env = "TANDEM_TRUST_FORWARDED_FOR")]
    trust_forwarded_for: bool,

    /// Pending events per client before fan-out drops
    #[arg(long, env = "TANDEM_MAILBOX_CAPACITY", default_value_t = 200)]
    mailbox_capacity: usize,

    /// Seconds between pings on an idle connection
    #[arg(long, env = "TANDEM_HEARTBEAT_SECS", default_value_t = 54)]
    heartbeat_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = ServerConfig {
        bind_addr: cli.bind,
        mailbox_capacity: cli.mailbox_capacity.max(1),
        heartbeat_interval: Duration::from_secs(cli.heartbeat_secs.max(1)),
        trust_forwarded_for: cli.trust_forwarded_for,
        storage_path: (!cli.memory).then_some(cli.data_dir),
        ..ServerConfig::default()
    };

    log::info!("Starting tandem-server...");
    let storage = open_storage(&config)?;
    let server = CollabServer::new(config, storage).await?;
    server.run().await?;
    Ok(())
}
