use clap::Parser;
use mapcache::server::{Daemon, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "mapcached", about = "mapcache server", version)]
struct Args {
  #[arg(short, long, env = "MAPCACHE_CONFIG")]
  config: Option<String>,
  #[arg(long, env = "MAPCACHE_HOST")]
  host: Option<String>,
  #[arg(long, env = "MAPCACHE_HTTP_PORT")]
  http_port: Option<u16>,
  #[arg(long, env = "MAPCACHE_RESP_PORT")]
  resp_port: Option<u16>,
  #[arg(long, env = "MAPCACHE_DEFAULT_CACHE")]
  default_cache: Option<String>,
  #[arg(long, env = "MAPCACHE_SNAPSHOT_DIR")]
  snapshot_dir: Option<PathBuf>,
  #[arg(long, env = "MAPCACHE_LOG_LEVEL")]
  log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
  let args = Args::parse();

  // Load config: explicit path > auto-detect > defaults
  let mut config = if let Some(path) = &args.config {
    ServerConfig::from_file(path)?
  } else {
    ServerConfig::find_and_load()?.unwrap_or_default()
  };

  // CLI args override config file
  if let Some(host) = args.host {
    config.server.host = host;
  }
  if let Some(port) = args.http_port {
    config.server.ports.http = port;
  }
  if let Some(port) = args.resp_port {
    config.server.ports.resp = port;
  }
  if let Some(name) = args.default_cache {
    config.cache.default_cache = name;
  }
  if let Some(dir) = args.snapshot_dir {
    config.snapshot.dir = dir;
  }
  if let Some(level) = args.log_level {
    config.logging.level = level;
  }

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  let daemon = Arc::new(Daemon::new(config));
  let daemon_clone = daemon.clone();

  // Handle shutdown signals (SIGINT, SIGTERM)
  tokio::spawn(async move {
    shutdown_signal().await;
    daemon_clone.shutdown();

    // Give servers time to drain connections
    tokio::time::sleep(Duration::from_secs(5)).await;
    tracing::info!("Shutdown complete");
    std::process::exit(0);
  });

  daemon.run().await?;
  tracing::info!("Shutdown complete");
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::error!("Failed to install Ctrl+C handler: {}", e);
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(e) => {
        tracing::error!("Failed to install SIGTERM handler: {}", e);
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => tracing::info!("Received SIGINT"),
    _ = terminate => tracing::info!("Received SIGTERM"),
  }
}
