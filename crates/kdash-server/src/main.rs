//! kdashd - KPro telemetry daemon

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use kdash_core::prelude::*;
use kdash_core::protocol::SerialConfig;
use kdash_core::setup::default_setup_path;
use kdash_server::{WebSocketServerBuilder, DEFAULT_PORT};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kdashd", version, about = "Live KPro telemetry for in-car dashboards")]
struct Args {
    /// Address the WebSocket server listens on
    #[arg(long, env = "KDASH_BIND", default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
    bind: SocketAddr,

    /// Setup file (defaults to the user config directory)
    #[arg(long, env = "KDASH_SETUP")]
    setup: Option<PathBuf>,

    /// Milliseconds between snapshots
    #[arg(long, env = "KDASH_INTERVAL_MS", default_value_t = 100)]
    interval_ms: u64,

    /// Simulate a device instead of opening the serial port
    #[arg(long, env = "KDASH_DEMO")]
    demo: bool,

    /// Revision simulated in demo mode
    #[arg(long, default_value = "kpro4")]
    demo_revision: DeviceRevision,

    /// Serial port to use instead of scanning by USB id
    #[arg(long, env = "KDASH_PORT")]
    port: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let setup_path = args.setup.clone().unwrap_or_else(default_setup_path);
    let store = FileConfigStore::new(&setup_path);
    let setup = store
        .load()
        .with_context(|| format!("reading setup from {}", setup_path.display()))?;
    info!(path = %setup_path.display(), "setup loaded");

    if args.demo {
        info!(revision = %args.demo_revision, "demo mode");
        run(DemoTransport::new(args.demo_revision), store, setup, &args).await
    } else {
        let transport = SerialTransport::new(SerialConfig {
            port_name: args.port.clone(),
            ..SerialConfig::default()
        });
        run(transport, store, setup, &args).await
    }
}

async fn run<T: Transport + 'static>(
    transport: T,
    store: FileConfigStore,
    setup: Setup,
    args: &Args,
) -> anyhow::Result<()> {
    let config = TelemetryConfig::with_interval(Duration::from_millis(args.interval_ms.max(1)));
    let telemetry = TelemetryLoop::new(DeviceSession::new(transport), store, setup, config)
        .context("setup contains an invalid conversion rule")?;

    let shutdown = CancellationToken::new();
    let handle = telemetry.spawn(shutdown.clone());
    let server = WebSocketServerBuilder::new(args.bind, handle.hub())
        .spawn(shutdown.clone())
        .await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown.cancel();

    server.join().await?;
    handle.join().await;
    Ok(())
}
