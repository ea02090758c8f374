use super::framing::JsonStreamDecoder;
use crate::domain::message::{InboundMessage, acknowledgement};
use crate::domain::ports::{MessageSink, Transport, TransportBox, TransportConnector};
use crate::error::{Result, TerminalError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long a blocking read waits before checking the stop flag again.
const READ_POLL: Duration = Duration::from_millis(100);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const READ_BUFFER: usize = 4096;

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

/// Opens the terminal's USB/serial device.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    path: String,
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

#[async_trait]
impl TransportConnector for SerialConnector {
    async fn connect(&self, sink: MessageSink) -> Result<TransportBox> {
        let path = self.path.clone();
        let baud_rate = self.baud_rate;

        let (writer, reader) = tokio::task::spawn_blocking(move || -> Result<_> {
            let writer = serialport::new(&path, baud_rate)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .flow_control(serialport::FlowControl::None)
                .timeout(WRITE_TIMEOUT)
                .open()?;
            let mut reader = writer.try_clone()?;
            reader.set_timeout(READ_POLL)?;
            Ok((writer, reader))
        })
        .await
        .map_err(|err| TerminalError::Transport(format!("serial open task failed: {err}")))??;

        info!(path = %self.path, baud_rate, "Serial port opened");

        let writer: SharedPort = Arc::new(Mutex::new(writer));
        let stop = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(true));

        let reader_loop = ReaderLoop {
            port: reader,
            writer: Arc::clone(&writer),
            sink,
            stop: Arc::clone(&stop),
            connected: Arc::clone(&connected),
        };
        thread::Builder::new()
            .name(format!("serial-reader:{}", self.path))
            .spawn(move || reader_loop.run())?;

        Ok(Arc::new(SerialTransport {
            writer,
            stop,
            connected,
        }))
    }

    fn describe(&self) -> String {
        format!("serial {} @ {} baud", self.path, self.baud_rate)
    }
}

struct SerialTransport {
    writer: SharedPort,
    stop: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&self, bytes: &[u8]) -> Result<()> {
        let writer = Arc::clone(&self.writer);
        let bytes = bytes.to_vec();

        let written = tokio::task::spawn_blocking(move || write_all(&writer, &bytes))
            .await
            .map_err(|err| TerminalError::Transport(format!("serial write task failed: {err}")))?;

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

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn write_all<W: Write>(port: &Arc<Mutex<W>>, bytes: &[u8]) -> io::Result<()> {
    let mut port = port.lock();
    port.write_all(bytes)?;
    port.flush()
}

/// Reads terminal output on a dedicated thread, answering through the shared writer.
struct ReaderLoop<R, W> {
    port: R,
    writer: Arc<Mutex<W>>,
    sink: MessageSink,
    stop: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
}

impl<R: Read, W: Write> ReaderLoop<R, W> {
    fn run(mut self) {
        let mut decoder = JsonStreamDecoder::new();
        let mut buffer = [0u8; READ_BUFFER];

        while !self.stop.load(Ordering::Relaxed) {
            let read = match self.port.read(&mut buffer) {
                Ok(0) => continue,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => continue,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("Serial read failed, closing the link: {err}");
                    break;
                }
            };

            for message in decoder.push(&buffer[..read]) {
                // Anything other than an acknowledgement is answered with one at once,
                // whatever the session later makes of it.
                if !InboundMessage::is_acknowledgement(&message) {
                    self.acknowledge();
                }
                if self.sink.send(message).is_err() {
                    debug!("Session is gone, stopping serial reader");
                    self.stop.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        debug!("Serial reader stopped");
    }

    fn acknowledge(&self) {
        let ack = acknowledgement().to_string();
        match write_all(&self.writer, ack.as_bytes()) {
            Ok(()) => debug!("Acknowledged terminal message"),
            Err(err) => warn!("Failed to acknowledge terminal message: {err}"),
        }
    }
}
