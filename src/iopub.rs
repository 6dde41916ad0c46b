//! Broadcast channel of the notebook front-end.

use crate::error::Error;
use base64::prelude::*;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Mutex;

/// Content of an `error` notification and of error replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorContent {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

impl ErrorContent {
    /// Error with empty name and value, all information is in the traceback.
    pub fn new(traceback: Vec<String>) -> Self {
        Self {
            ename: String::new(),
            evalue: String::new(),
            traceback,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "msg_type", content = "content", rename_all = "snake_case")]
pub enum Notification {
    Stream {
        name: String,
        text: String,
    },
    ExecuteResult {
        execution_count: u32,
        data: BTreeMap<String, String>,
        metadata: Value,
    },
    Error(ErrorContent),
}

impl Notification {
    pub fn stdout(text: impl Into<String>) -> Self {
        Notification::Stream {
            name: "stdout".to_string(),
            text: text.into(),
        }
    }

    pub fn plain_result(execution_count: u32, text: impl Into<String>) -> Self {
        Notification::ExecuteResult {
            execution_count,
            data: BTreeMap::from([("text/plain".to_string(), text.into())]),
            metadata: json!({}),
        }
    }
}

/// Publisher of side-channel messages. Shared between the kernel and relay threads.
pub trait IoPub: Send + Sync {
    fn publish(&self, notification: Notification) -> Result<(), Error>;

    /// Publish a pre-built message, parts are forwarded unmodified.
    fn publish_multipart(&self, parts: Vec<Vec<u8>>) -> Result<(), Error>;
}

/// Writes every message as a single JSON line.
pub struct JsonLinesIoPub<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesIoPub<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn write_line<T: Serialize>(&self, message: &T) -> Result<(), Error> {
        let line = serde_json::to_string(message)?;
        let mut out = self.out.lock()?;
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }

    /// Write a reply to the request of `kind` (like `execute` or `complete`).
    pub fn reply<T: Serialize>(&self, kind: &str, content: &T) -> Result<(), Error> {
        self.write_line(&json!({
            "msg_type": format!("{kind}_reply"),
            "content": content,
        }))
    }
}

impl<W: Write + Send> IoPub for JsonLinesIoPub<W> {
    fn publish(&self, notification: Notification) -> Result<(), Error> {
        self.write_line(&notification)
    }

    fn publish_multipart(&self, parts: Vec<Vec<u8>>) -> Result<(), Error> {
        let parts: Vec<String> = parts.iter().map(|p| BASE64_STANDARD.encode(p)).collect();
        self.write_line(&json!({"msg_type": "display_data_raw", "parts": parts}))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Published {
    Notification(Notification),
    Multipart(Vec<Vec<u8>>),
}

/// Keeps everything published in memory.
#[derive(Debug, Default)]
pub struct MemoryIoPub {
    published: Mutex<Vec<Published>>,
}

impl MemoryIoPub {
    /// Take all messages published so far.
    pub fn take(&self) -> Vec<Published> {
        self.published
            .lock()
            .map(|mut published| std::mem::take(&mut *published))
            .unwrap_or_default()
    }

    /// All stdout stream texts published so far, in order.
    pub fn stdout_chunks(&self) -> Vec<String> {
        self.published
            .lock()
            .map(|published| {
                published
                    .iter()
                    .filter_map(|p| match p {
                        Published::Notification(Notification::Stream { name, text })
                            if name == "stdout" =>
                        {
                            Some(text.clone())
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl IoPub for MemoryIoPub {
    fn publish(&self, notification: Notification) -> Result<(), Error> {
        self.published
            .lock()?
            .push(Published::Notification(notification));
        Ok(())
    }

    fn publish_multipart(&self, parts: Vec<Vec<u8>>) -> Result<(), Error> {
        self.published.lock()?.push(Published::Multipart(parts));
        Ok(())
    }
}
