use serde_json::{Deserializer, Value};
use tracing::{debug, warn};

/// Largest amount of unparsed input kept while waiting for the rest of a document.
pub const MAX_PENDING_BYTES: usize = 1024 * 1024;

/// Splits an inbound byte stream into JSON documents.
///
/// The terminal normally writes one document per chunk. Documents split across reads
/// or several documents in one read are handled too. Input that is not JSON is logged
/// and discarded together with whatever was buffered.
#[derive(Debug, Default)]
pub struct JsonStreamDecoder {
    pending: Vec<u8>,
}

impl JsonStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.pending.extend_from_slice(chunk);

        let mut documents = Vec::new();
        let mut consumed = 0;
        let mut stream = Deserializer::from_slice(&self.pending).into_iter::<Value>();

        loop {
            match stream.next() {
                Some(Ok(document)) => {
                    documents.push(document);
                    consumed = stream.byte_offset();
                }
                Some(Err(err)) if err.is_eof() => break,
                Some(Err(err)) => {
                    warn!(
                        bytes = self.pending.len(),
                        "Discarding inbound data that is not JSON: {err}"
                    );
                    consumed = self.pending.len();
                    break;
                }
                None => {
                    consumed = self.pending.len();
                    break;
                }
            }
        }

        self.pending.drain(..consumed);

        if self.pending.len() > MAX_PENDING_BYTES {
            warn!(
                bytes = self.pending.len(),
                "Discarding oversized incomplete inbound document"
            );
            self.pending.clear();
        } else if !self.pending.is_empty() {
            debug!(bytes = self.pending.len(), "Waiting for the rest of an inbound document");
        }

        documents
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
