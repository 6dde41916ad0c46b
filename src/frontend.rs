//! JSON-lines notebook front: one request per input line, replies and notifications
//! are written as lines too.

use crate::error::Error;
use crate::iopub::JsonLinesIoPub;
use crate::kernel::Kernel;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{BufRead, Write};

#[derive(Debug, Deserialize)]
#[serde(tag = "msg_type", rename_all = "snake_case")]
enum Request {
    ExecuteRequest {
        #[serde(default)]
        header: Value,
        content: ExecuteContent,
    },
    CompleteRequest {
        content: CompleteContent,
    },
    ShutdownRequest {
        #[serde(default)]
        content: Value,
    },
}

#[derive(Debug, Deserialize)]
struct ExecuteContent {
    code: String,
}

#[derive(Debug, Deserialize)]
struct CompleteContent {
    code: String,
    cursor_pos: usize,
}

/// Serve requests until the input ends or a shutdown is requested.
/// The kernel is not shut down here.
pub fn serve<R: BufRead, W: Write + Send>(
    kernel: &Kernel,
    input: R,
    out: &JsonLinesIoPub<W>,
) -> Result<(), Error> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(target: "kernel", "malformed request skipped: {e}");
                continue;
            }
        };
        debug!(target: "kernel", "request: {request:?}");

        match request {
            Request::ExecuteRequest { header, content } => {
                kernel.counter().increment();
                let reply = kernel.execute(&content.code, &header);
                out.reply("execute", &reply)?;
            }
            Request::CompleteRequest { content } => {
                // disabled completion is answered with null content
                let reply = kernel.complete(&content.code, content.cursor_pos);
                out.reply("complete", &reply)?;
            }
            Request::ShutdownRequest { content } => {
                let restart = content["restart"].as_bool().unwrap_or(false);
                out.reply("shutdown", &json!({"status": "ok", "restart": restart}))?;
                return Ok(());
            }
        }
    }
    Ok(())
}
