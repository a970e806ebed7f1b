//! RESP listener

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use super::commands::execute_command;
use super::protocol::{extract_command, RespParser, RespValue};
use super::session::Session;
use crate::cache::Registry;

pub struct RespServer {
  listener: TcpListener,
  registry: Arc<Registry>,
  shutdown_rx: broadcast::Receiver<()>,
}

impl RespServer {
  /// Serve on an already bound listener.
  pub fn new(
    listener: TcpListener,
    registry: Arc<Registry>,
    shutdown_rx: broadcast::Receiver<()>,
  ) -> Self {
    Self {
      listener,
      registry,
      shutdown_rx,
    }
  }

  pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
    self.listener.local_addr()
  }

  /// Accept connections until shutdown is signalled.
  pub async fn run(mut self) -> Result<(), anyhow::Error> {
    tracing::info!("RESP listening on {}", self.listener.local_addr()?);

    loop {
      tokio::select! {
        result = self.listener.accept() => {
          match result {
            Ok((socket, addr)) => {
              let session = Session::new(self.registry.clone());
              tokio::spawn(async move {
                if let Err(e) = handle_client(socket, addr, session).await {
                  tracing::debug!("RESP client {} error: {}", addr, e);
                }
              });
            }
            Err(e) => {
              tracing::error!("RESP accept error: {}", e);
            }
          }
        }
        _ = self.shutdown_rx.recv() => {
          tracing::info!("RESP server shutting down");
          break;
        }
      }
    }
    Ok(())
  }
}

/// Serve one connection. Commands on a connection run strictly in order.
async fn handle_client(
  mut socket: TcpStream,
  addr: SocketAddr,
  mut session: Session,
) -> Result<(), anyhow::Error> {
  tracing::debug!(session = session.id(), "RESP client connected: {}", addr);

  let mut parser = RespParser::new();
  let mut buf = [0u8; 4096];

  let result: Result<(), anyhow::Error> = async {
    loop {
      let n = socket.read(&mut buf).await?;
      if n == 0 {
        return Ok(());
      }

      parser.feed(&buf[..n]);

      while let Some(value) = parser.parse()? {
        let response = match extract_command(&value) {
          Some((cmd, _)) if cmd == "QUIT" => {
            socket.write_all(&RespValue::ok().encode()).await?;
            return Ok(());
          }
          Some((cmd, args)) => execute_command(&mut session, &cmd, &args).await,
          None => RespValue::error("ERR invalid command format"),
        };
        socket.write_all(&response.encode()).await?;
      }
    }
  }
  .await;

  session.close();
  tracing::debug!(session = session.id(), "RESP client disconnected: {}", addr);
  result
}
