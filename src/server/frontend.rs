use async_trait::async_trait;

use crate::api::ApiServer;
use crate::resp::RespServer;

/// A listener the daemon drives until shutdown.
#[async_trait]
pub trait Frontend: Send {
  fn name(&self) -> &'static str;

  async fn serve(self: Box<Self>) -> Result<(), anyhow::Error>;
}

#[async_trait]
impl Frontend for ApiServer {
  fn name(&self) -> &'static str {
    "HTTP"
  }

  async fn serve(self: Box<Self>) -> Result<(), anyhow::Error> {
    self.run().await
  }
}

#[async_trait]
impl Frontend for RespServer {
  fn name(&self) -> &'static str {
    "RESP"
  }

  async fn serve(self: Box<Self>) -> Result<(), anyhow::Error> {
    self.run().await
  }
}
