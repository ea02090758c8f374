use super::framing::JsonStreamDecoder;
use crate::config::RECEIVED_TIMEOUT_SECS;
use crate::domain::ports::{MessageSink, Transport, TransportBox, TransportConnector};
use crate::error::{Result, TerminalError};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Opens a TCP connection to a networked terminal.
#[derive(Debug, Clone)]
pub struct IpConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl IpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(RECEIVED_TIMEOUT_SECS),
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

#[async_trait]
impl TransportConnector for IpConnector {
    async fn connect(&self, sink: MessageSink) -> Result<TransportBox> {
        let connecting = TcpStream::connect((self.host.as_str(), self.port));
        let stream = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                return Err(TerminalError::Transport(format!(
                    "could not reach terminal at {}:{}: {err}",
                    self.host, self.port
                )));
            }
            Err(_) => {
                return Err(TerminalError::Transport(format!(
                    "terminal at {}:{} did not accept within {}s",
                    self.host,
                    self.port,
                    self.connect_timeout.as_secs()
                )));
            }
        };
        stream.set_nodelay(true)?;
        info!(host = %self.host, port = self.port, "Connected to terminal");

        let (reader, writer) = stream.into_split();
        let connected = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(reader, sink, Arc::clone(&connected)));

        Ok(Arc::new(IpTransport {
            writer: Mutex::new(writer),
            connected,
            reader,
        }))
    }

    fn describe(&self) -> String {
        format!("tcp {}:{}", self.host, self.port)
    }
}

struct IpTransport {
    writer: Mutex<OwnedWriteHalf>,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl Transport for IpTransport {
    async fn send(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(TerminalError::Transport(
                "terminal connection is closed".to_string(),
            ));
        }

        let mut writer = self.writer.lock().await;
        let written = match writer.write_all(bytes).await {
            Ok(()) => writer.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            self.connected.store(false, Ordering::SeqCst);
            return Err(err.into());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for IpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(mut reader: OwnedReadHalf, sink: MessageSink, connected: Arc<AtomicBool>) {
    let mut decoder = JsonStreamDecoder::new();
    let mut buffer = vec![0u8; 4096];

    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => {
                info!("Terminal closed the connection");
                break;
            }
            Ok(read) => {
                for message in decoder.push(&buffer[..read]) {
                    if sink.send(message).is_err() {
                        debug!("Session is gone, stopping TCP reader");
                        connected.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }
            Err(err) => {
                warn!("Terminal connection failed: {err}");
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
}
