//! Relay server binary.
//!
//! Loads configuration, opens the client directory and mailbox store, and
//! serves the relay protocol on a single-threaded runtime until Ctrl-C.

use clap::Parser;
use relay_server::{Dispatcher, RelayServer, Router};
use relay_storage::Storage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::RelayConfig;
use logging::RelayLogFormatter;

/// Store-and-forward relay for registered clients
#[derive(Parser, Debug)]
#[command(name = "relay", version, about = "Store-and-forward message relay")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Legacy port file; its first line is the listen port
    #[arg(long, default_value = "port.info")]
    port_file: PathBuf,

    /// Listen host (IP address)
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(long)]
    port: Option<u16>,

    /// Listen queue length
    #[arg(long)]
    backlog: Option<u32>,

    /// Storage mode: memory, file
    #[arg(long)]
    storage_mode: Option<String>,

    /// Data directory for file storage
    #[arg(long)]
    storage_data_dir: Option<PathBuf>,

    /// Sync file storage writes to disk
    #[arg(long)]
    storage_fsync: Option<bool>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Command-line flags take precedence over every other source
    fn apply_to(&self, config: &mut RelayConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(backlog) = self.backlog {
            config.backlog = backlog;
        }
        if let Some(mode) = &self.storage_mode {
            config.storage.mode = mode.clone();
        }
        if let Some(data_dir) = &self.storage_data_dir {
            config.storage.data_dir = data_dir.clone();
        }
        if let Some(fsync) = self.storage_fsync {
            config.storage.fsync = fsync;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("relay={}", args.log_level).parse()?)
        .add_directive(format!("relay_server={}", args.log_level).parse()?)
        .add_directive(format!("relay_storage={}", args.log_level).parse()?)
        .add_directive(format!("relay_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .event_format(RelayLogFormatter::new("relay"))
        .init();

    info!(
        "Starting relay v{} (protocol version {})",
        env!("CARGO_PKG_VERSION"),
        relay_wire::SERVER_VERSION
    );

    let mut config = RelayConfig::load(&args.config, &args.port_file)?;
    args.apply_to(&mut config);
    let storage_mode = config.storage_mode()?;
    let addr = config.listen_addr()?;

    component_info!("storage", "Opening {:?} storage", storage_mode);
    let storage = Storage::from_mode(storage_mode).await?;
    let dispatcher = Dispatcher::new(Arc::new(storage), Arc::new(Router::standard()));

    let server = RelayServer::bind(addr, config.backlog, dispatcher)?;
    component_info!("server", "Serving on {}", server.local_addr()?);
    server.run().await?;

    info!("Relay shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags_override_config() {
        let args = Args::parse_from([
            "relay",
            "--port",
            "9000",
            "--storage-mode",
            "file",
            "--storage-fsync",
            "false",
        ]);
        let mut config = RelayConfig::default();
        config.host = "10.0.0.1".to_string();
        args.apply_to(&mut config);

        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.storage.mode, "file");
        assert!(!config.storage.fsync);
    }
}
