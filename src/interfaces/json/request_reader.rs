use crate::application::service::PaymentRequest;
use crate::error::{Result, TerminalError};
use serde_json::Deserializer;
use std::io::Read;

/// Reads payment requests from a JSON source.
///
/// The source holds one or more request documents back to back, typically one per
/// line, each shaped like the body of a payment order.
pub struct PaymentRequestReader<R: Read> {
    source: R,
}

impl<R: Read> PaymentRequestReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Lazily deserializes the requests in order. A malformed document ends the stream
    /// with an error.
    pub fn requests(self) -> impl Iterator<Item = Result<PaymentRequest>> {
        Deserializer::from_reader(self.source)
            .into_iter::<PaymentRequest>()
            .map(|result| result.map_err(TerminalError::from))
    }
}
