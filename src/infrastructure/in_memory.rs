use crate::domain::ports::{MessageSink, Transport, TransportBox, TransportConnector};
use crate::error::{Result, TerminalError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;
use tracing::warn;

#[derive(Default)]
struct Shared {
    sink: Mutex<Option<MessageSink>>,
    sent: Mutex<Vec<Vec<u8>>>,
    cursor: Mutex<usize>,
    sent_notify: Notify,
    connects: AtomicUsize,
    link_up: AtomicBool,
    fail_sends: AtomicBool,
    fail_connects: AtomicBool,
    stall_connects: AtomicBool,
    stall_sends: AtomicBool,
}

/// Connector for an in-process terminal stand-in.
///
/// The paired [`InMemoryTerminal`] sees every frame written by the session and can
/// push arbitrary inbound documents back, which makes the protocol engine testable
/// without hardware.
pub struct InMemoryConnector {
    shared: Arc<Shared>,
}

impl InMemoryConnector {
    pub fn new() -> (Self, InMemoryTerminal) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            InMemoryTerminal { shared },
        )
    }
}

#[async_trait]
impl TransportConnector for InMemoryConnector {
    async fn connect(&self, sink: MessageSink) -> Result<TransportBox> {
        if self.shared.stall_connects.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.shared.fail_connects.load(Ordering::SeqCst) {
            return Err(TerminalError::Transport(
                "in-memory terminal refused the connection".to_string(),
            ));
        }
        *self.shared.sink.lock() = Some(sink);
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        self.shared.link_up.store(true, Ordering::SeqCst);
        Ok(Arc::new(InMemoryTransport {
            shared: Arc::clone(&self.shared),
        }))
    }

    fn describe(&self) -> String {
        "in-memory terminal".to_string()
    }
}

struct InMemoryTransport {
    shared: Arc<Shared>,
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, bytes: &[u8]) -> Result<()> {
        if self.shared.stall_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(TerminalError::Transport(
                "in-memory terminal write failed".to_string(),
            ));
        }
        self.shared.sent.lock().push(bytes.to_vec());
        self.shared.sent_notify.notify_waiters();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.link_up.load(Ordering::SeqCst)
    }
}

/// The terminal side of an [`InMemoryConnector`].
#[derive(Clone)]
pub struct InMemoryTerminal {
    shared: Arc<Shared>,
}

impl InMemoryTerminal {
    /// Delivers `message` as if the terminal had written it.
    pub fn reply(&self, message: Value) {
        match self.shared.sink.lock().as_ref() {
            Some(sink) => {
                if sink.send(message).is_err() {
                    warn!("In-memory terminal reply dropped, session is gone");
                }
            }
            None => warn!("In-memory terminal reply dropped, nothing connected yet"),
        }
    }

    /// Raw envelopes written so far, parsed as JSON.
    pub fn sent_frames(&self) -> Vec<Value> {
        self.shared
            .sent
            .lock()
            .iter()
            .map(|frame| serde_json::from_slice(frame).unwrap_or(Value::Null))
            .collect()
    }

    /// The commands carried inside the envelopes written so far.
    pub fn sent_commands(&self) -> Vec<Value> {
        self.sent_frames().iter().map(embedded_command).collect()
    }

    /// Waits for the next command written after the last one returned here.
    pub async fn next_command(&self) -> Value {
        loop {
            let notified = self.shared.sent_notify.notified();
            {
                let sent = self.shared.sent.lock();
                let mut cursor = self.shared.cursor.lock();
                if let Some(frame) = sent.get(*cursor) {
                    *cursor += 1;
                    let frame = serde_json::from_slice(frame).unwrap_or(Value::Null);
                    return embedded_command(&frame);
                }
            }
            notified.await;
        }
    }

    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Marks the current link as lost; the session reconnects on its next command.
    pub fn disconnect(&self) {
        self.shared.link_up.store(false, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_connects(&self, fail: bool) {
        self.shared.fail_connects.store(fail, Ordering::SeqCst);
    }

    /// Makes connection attempts hang, like a host that never answers.
    pub fn stall_connects(&self, stall: bool) {
        self.shared.stall_connects.store(stall, Ordering::SeqCst);
    }

    /// Makes writes hang, like a link whose peer stopped reading.
    pub fn stall_sends(&self, stall: bool) {
        self.shared.stall_sends.store(stall, Ordering::SeqCst);
    }
}

fn embedded_command(frame: &Value) -> Value {
    frame
        .get("JsonSerialized")
        .and_then(Value::as_str)
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_records_frames_and_replays_messages() {
        let (connector, terminal) = InMemoryConnector::new();
        let (sink, mut inbound) = mpsc::unbounded_channel();

        let transport = connector.connect(sink).await.unwrap();
        let frame = json!({"JsonSerialized": "{\"Command\":106}", "Sign": "AB"});
        transport
            .send(serde_json::to_vec(&frame).unwrap().as_slice())
            .await
            .unwrap();

        assert_eq!(terminal.sent_frames(), vec![frame]);
        assert_eq!(terminal.next_command().await, json!({"Command": 106}));

        terminal.reply(json!({"Received": true}));
        assert_eq!(inbound.recv().await, Some(json!({"Received": true})));
    }

    #[tokio::test]
    async fn test_disconnect_flips_link_state() {
        let (connector, terminal) = InMemoryConnector::new();
        let (sink, _inbound) = mpsc::unbounded_channel();
        let transport = connector.connect(sink).await.unwrap();

        assert!(transport.is_connected());
        terminal.disconnect();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let (connector, terminal) = InMemoryConnector::new();
        terminal.fail_connects(true);
        let (sink, _inbound) = mpsc::unbounded_channel();
        assert!(matches!(
            connector.connect(sink).await,
            Err(TerminalError::Transport(_))
        ));
        assert_eq!(terminal.connect_count(), 0);
    }
}
