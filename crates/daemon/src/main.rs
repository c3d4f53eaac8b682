use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use eeg_sensor::{default_cyton_commands, MockDriver};
use engagement_daemon::{
    config::{load_config, BridgeConfig},
    server::{self, AppState},
    AcquisitionLoop,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "engagement_daemon=info,eeg_ws_bridge=info,tower_http=info";

/// Streams a normalized EEG engagement score to WebSocket clients.
#[derive(Parser, Debug)]
#[command(name = "eeg_ws_bridge", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// WebSocket bind address, e.g. ws://0.0.0.0:8765
    #[arg(long)]
    ws: Option<String>,

    /// Serial port of the board
    #[arg(long)]
    serial: Option<String>,

    /// Board configuration command, sent after the session is prepared (repeatable)
    #[arg(long = "cmd", value_name = "COMMAND")]
    commands: Vec<String>,

    /// Append the standard Cyton/Daisy channel settings to the board commands
    #[arg(long)]
    apply_default_cyton_config: bool,

    /// Log filter, e.g. `info` or `engagement_daemon=debug`. RUST_LOG takes precedence.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut BridgeConfig) {
        if let Some(ws) = self.ws {
            config.ws_addr = ws;
        }
        if let Some(serial) = self.serial {
            config.device.serial_port = serial;
        }
        config.device.board_commands.extend(self.commands);
        if self.apply_default_cyton_config {
            config.device.board_commands.extend(default_cyton_commands());
        }
    }
}

fn init_logging(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.unwrap_or(DEFAULT_LOG_FILTER).into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    tracing::info!("EEG engagement bridge starting...");

    let mut config = load_config(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);
    config.validate().context("validating configuration")?;
    let addr = config.socket_addr()?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    // The mock board stands in for hardware; any EegDevice plugs in here.
    let (acquisition, handle) = AcquisitionLoop::new(config.clone(), MockDriver::new());
    let state = AppState::new(&handle, &config);
    drop(handle);

    let shutdown = CancellationToken::new();
    let server_handle = tokio::spawn(server::run(listener, state, shutdown.clone()));
    let acquisition_handle = tokio::spawn(acquisition.run(shutdown.clone()));

    // --- Graceful Shutdown ---
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received. Stopping services..."),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
        ctrl_c.cancel();
    });

    let result = acquisition_handle.await.context("acquisition task panicked")?;
    // A fatal device error ends acquisition; take the server down with it.
    shutdown.cancel();
    server_handle
        .await
        .context("server task panicked")?
        .context("WebSocket server failed")?;

    result.context("acquisition stopped")?;
    tracing::info!("EEG engagement bridge stopped gracefully.");
    Ok(())
}
