use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// Writes results as JSON, one document per line.
pub struct ResultWriter<W: Write> {
    sink: W,
    pretty: bool,
}

impl<W: Write> ResultWriter<W> {
    pub fn new(sink: W, pretty: bool) -> Self {
        Self { sink, pretty }
    }

    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<()> {
        if self.pretty {
            serde_json::to_writer_pretty(&mut self.sink, value)?;
        } else {
            serde_json::to_writer(&mut self.sink, value)?;
        }
        self.sink.write_all(b"\n")?;
        self.sink.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}
