//! DAP message framing over an arbitrary byte stream (adapter process stdio in practice).

use crate::error::Error;
use serde::Serialize;
use serde_json::Value;
use std::io::{BufRead, Write};

/// Reading half of a DAP connection.
pub struct FrameReader<R: BufRead> {
    reader: R,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read a single message (with Content-Length framing).
    pub fn read_message(&mut self) -> Result<Value, Error> {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let read_n = self.reader.read_line(&mut line)?;
            if read_n == 0 {
                return Err(Error::AdapterClosed);
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if content_length.is_some() {
                    break;
                }
                continue;
            }
            if let Some(v) = line.strip_prefix("Content-Length:") {
                let len = v
                    .trim()
                    .parse()
                    .map_err(|_| Error::Protocol(format!("bad Content-Length `{v}`")))?;
                content_length = Some(len);
            }
        }

        let len = content_length.ok_or_else(|| Error::Protocol("missing Content-Length".into()))?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        Ok(serde_json::from_slice(&buf)?)
    }
}

/// Writing half of a DAP connection.
pub struct FrameWriter<W: Write> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a single message (with Content-Length framing).
    pub fn write_message<T: Serialize>(&mut self, message: &T) -> Result<(), Error> {
        let payload = serde_json::to_vec(message)?;
        write!(self.writer, "Content-Length: {}\r\n\r\n", payload.len())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;
        Ok(())
    }
}
