use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Where a transport delivers every parsed inbound JSON document, in arrival order.
pub type MessageSink = mpsc::UnboundedSender<Value>;

/// A byte-oriented link to the terminal.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, bytes: &[u8]) -> Result<()>;

    /// Whether the link can still carry traffic. A transport reporting `false` is
    /// replaced before the next command.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Opens a [`Transport`] wired to `sink`.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self, sink: MessageSink) -> Result<Arc<dyn Transport>>;

    /// Short human readable description, used in logs.
    fn describe(&self) -> String;
}

pub type TransportBox = Arc<dyn Transport>;
pub type ConnectorBox = Arc<dyn TransportConnector>;
