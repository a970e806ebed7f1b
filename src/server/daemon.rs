use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use super::{Frontend, ServerConfig};
use crate::api::{ApiServer, AppState};
use crate::cache::Registry;
use crate::resp::RespServer;

/// Owns the registry and both listeners.
pub struct Daemon {
  config: ServerConfig,
  registry: Arc<Registry>,
  shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
  pub fn new(config: ServerConfig) -> Self {
    let (shutdown_tx, _) = broadcast::channel(1);
    let registry = Registry::with_options(config.cache_settings(), config.registry_options());
    tracing::info!(
      "Cache registry created: default cache '{}', cascade depth {}, snapshots in {}",
      config.cache.default_cache,
      config.cache.max_cascade_depth,
      config.snapshot.dir.display()
    );

    Self {
      config,
      registry,
      shutdown_tx,
    }
  }

  /// Trigger graceful shutdown of all servers
  pub fn shutdown(&self) {
    tracing::info!("Initiating graceful shutdown...");
    let _ = self.shutdown_tx.send(());
  }

  /// Bind both ports, then serve until shutdown. A port that cannot be bound
  /// fails the whole daemon before anything is served.
  pub async fn run(&self) -> Result<(), anyhow::Error> {
    let http_addr = self.config.http_address();
    let resp_addr = self.config.resp_address();

    let http_listener = TcpListener::bind(&http_addr)
      .await
      .with_context(|| format!("failed to bind HTTP listener on {}", http_addr))?;
    let resp_listener = TcpListener::bind(&resp_addr)
      .await
      .with_context(|| format!("failed to bind RESP listener on {}", resp_addr))?;

    let frontends: Vec<Box<dyn Frontend>> = vec![
      Box::new(ApiServer::new(
        http_listener,
        AppState::new(self.registry.clone(), self.config.clone()),
        self.shutdown_tx.subscribe(),
      )),
      Box::new(RespServer::new(
        resp_listener,
        self.registry.clone(),
        self.shutdown_tx.subscribe(),
      )),
    ];

    let mut tasks = Vec::with_capacity(frontends.len());
    for frontend in frontends {
      let name = frontend.name();
      let shutdown_tx = self.shutdown_tx.clone();
      tasks.push(tokio::spawn(async move {
        let result = frontend.serve().await;
        if let Err(e) = &result {
          // One failed listener takes the other down with it.
          tracing::error!("{} server error: {}", name, e);
          let _ = shutdown_tx.send(());
        }
        result
      }));
    }

    let mut first_error = None;
    for task in tasks {
      let outcome = match task.await {
        Ok(result) => result,
        Err(e) => Err(anyhow::Error::new(e)),
      };
      if let Err(e) = outcome {
        first_error.get_or_insert(e);
      }
    }

    self.registry.shutdown();
    tracing::info!("All listeners stopped");
    match first_error {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_bind_failure_is_an_error() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();

    let mut config = ServerConfig::default();
    config.server.host = "127.0.0.1".into();
    config.server.ports.http = port;
    config.server.ports.resp = 0;

    let daemon = Daemon::new(config);
    let err = daemon.run().await.unwrap_err();
    assert!(err.to_string().contains("HTTP"));
  }

  #[tokio::test]
  async fn test_shutdown_stops_run() {
    let mut config = ServerConfig::default();
    config.server.host = "127.0.0.1".into();
    config.server.ports.http = 0;
    config.server.ports.resp = 0;

    let daemon = Arc::new(Daemon::new(config));
    let runner = daemon.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    // Let the listeners subscribe before signalling.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    daemon.shutdown();

    let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
      .await
      .unwrap()
      .unwrap();
    assert!(result.is_ok());
  }
}
