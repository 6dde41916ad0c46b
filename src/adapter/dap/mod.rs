//! [`DebugAdapter`] implementation over the Debug Adapter Protocol.
//!
//! The adapter process (for example `lldb-dap`) is spawned as a child and spoken to over its
//! stdio. A dedicated reader thread dispatches responses to the waiting requesters and collects
//! debugee output events, so stdout draining and interrupts work while `evaluate` blocks.

mod protocol;
pub mod transport;

use crate::adapter::{
    ByteOrder, Completion, DebugAdapter, EvalOptions, Evaluation, FrameInfo, LaunchConfig,
    ThreadId, ValueData, ValueInfo, ValueRef,
};
use crate::error::Error;
use base64::prelude::*;
use itertools::Itertools;
use log::{debug, error, info, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use protocol::{DapEvent, DapRequest, DapResponse, Incoming};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use transport::{FrameReader, FrameWriter};

/// Time limit for every launch phase (adapter handshake, process start, entry breakpoint hit).
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Evaluate context that always runs code as an expression. In `repl` context adapters
/// may take a cell for a debugger command.
const EVALUATE_CONTEXT: &str = "watch";

/// Error texts of a statement that produced no value. lldb reports it as a generic error
/// without a message, lldb-dap turns that into a failed `evaluate`.
const NO_RESULT_ERRORS: [&str; 5] = ["", "evaluate failed", "unknown error", "no result", "no value"];

/// State shared with the reader thread.
#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<i64, mpsc::SyncSender<DapResponse>>>,
    stdout: Mutex<String>,
    /// Receiver of lifecycle events, installed only while the target is launching.
    lifecycle: Mutex<Option<mpsc::Sender<DapEvent>>>,
    debugee_pid: Mutex<Option<Pid>>,
}

impl Shared {
    fn dispatch_response(&self, response: DapResponse) {
        debug!(target: "dap", "<- {}: {} (success: {})", response.request_seq, response.command, response.success);
        let sender = self
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(&response.request_seq));
        match sender {
            // requester may be gone (fire-and-forget requests)
            Some(sender) => {
                _ = sender.try_send(response);
            }
            None => warn!(target: "dap", "response to unknown request {}", response.request_seq),
        }
    }

    fn handle_event(&self, event: DapEvent) {
        match event.event.as_str() {
            "output" => {
                let category = event.body["category"].as_str().unwrap_or("console");
                let output = event.body["output"].as_str().unwrap_or_default();
                if category == "stdout" {
                    if let Ok(mut stdout) = self.stdout.lock() {
                        stdout.push_str(output);
                    }
                } else {
                    debug!(target: "dap", "{category}: {}", output.trim_end());
                }
                return;
            }
            "process" => {
                if let Some(pid) = event.body["systemProcessId"].as_i64() {
                    info!(target: "dap", "target process pid {pid}");
                    if let Ok(mut debugee_pid) = self.debugee_pid.lock() {
                        *debugee_pid = Some(Pid::from_raw(pid as i32));
                    }
                }
            }
            "exited" | "terminated" => {
                warn!(target: "dap", "target {}: {}", event.event, event.body);
            }
            _ => {
                debug!(target: "dap", "event {}", event.event);
            }
        }

        if let Ok(lifecycle) = self.lifecycle.lock() {
            if let Some(sender) = lifecycle.as_ref() {
                _ = sender.send(event);
            }
        }
    }
}

fn reader_loop<R: BufRead>(mut reader: FrameReader<R>, shared: Arc<Shared>) {
    loop {
        let message = match reader.read_message() {
            Ok(message) => message,
            Err(Error::AdapterClosed) => {
                info!(target: "dap", "debug adapter closed the connection");
                break;
            }
            Err(e) => {
                error!(target: "dap", "read adapter message: {e:#}");
                break;
            }
        };

        match serde_json::from_value::<Incoming>(message) {
            Ok(Incoming::Response(response)) => shared.dispatch_response(response),
            Ok(Incoming::Event(event)) => shared.handle_event(event),
            Ok(Incoming::Request(request)) => {
                warn!(target: "dap", "reverse request ignored: {request}")
            }
            Err(e) => warn!(target: "dap", "malformed adapter message: {e}"),
        }
    }

    // wake up all requesters, their channels are closed now
    if let Ok(mut pending) = shared.pending.lock() {
        pending.clear();
    }
}

/// Value known to the adapter during the current evaluation.
#[derive(Debug, Clone, Default)]
struct ValueEntry {
    name: Option<String>,
    description: String,
    type_name: Option<String>,
    variables_reference: i64,
    memory_reference: Option<String>,
    error: Option<String>,
}

impl ValueEntry {
    fn error(text: String) -> Self {
        Self {
            description: text.clone(),
            error: Some(text),
            ..Default::default()
        }
    }

    fn from_variable(var: &Value) -> Self {
        Self {
            name: var["name"].as_str().map(ToOwned::to_owned),
            description: var["value"].as_str().unwrap_or_default().to_string(),
            type_name: var["type"]
                .as_str()
                .filter(|t| !t.is_empty())
                .map(ToOwned::to_owned),
            variables_reference: var["variablesReference"].as_i64().unwrap_or(0),
            memory_reference: var["memoryReference"].as_str().map(ToOwned::to_owned),
            error: None,
        }
    }
}

#[derive(Default)]
struct ValueTable {
    generation: u64,
    entries: Vec<ValueEntry>,
}

impl ValueTable {
    /// Invalidate all handles issued so far.
    fn reset(&mut self) {
        self.generation += 1;
        self.entries.clear();
    }

    fn insert(&mut self, entry: ValueEntry) -> ValueRef {
        self.entries.push(entry);
        ValueRef::new((self.entries.len() - 1) as u64, self.generation)
    }

    fn get(&self, value: ValueRef) -> Result<&ValueEntry, Error> {
        if value.generation != self.generation {
            return Err(Error::StaleValue {
                id: value.id,
                generation: value.generation,
            });
        }
        self.entries
            .get(value.id as usize)
            .ok_or(Error::UnknownValue(value.id))
    }
}

#[derive(Default)]
struct TargetState {
    capabilities: Value,
    main_thread: Option<ThreadId>,
}

/// Parse a scalar the way DAP adapters print it: hex for pointers, decimal for integers.
/// Leading type annotations like `(Int)` are skipped.
pub(crate) fn parse_scalar(text: &str) -> Option<u64> {
    let token = text
        .split_whitespace()
        .find(|t| t.starts_with(|c: char| c.is_ascii_digit() || c == '-'))?;
    if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16).ok();
    }
    if let Ok(v) = token.parse::<i64>() {
        return Some(v as u64);
    }
    token.parse::<u64>().ok()
}

/// Failed `evaluate` response that stands for a statement without a value.
fn is_no_result(response: &DapResponse) -> bool {
    let text = response.error_text();
    let text = text.trim();
    let text = text.strip_prefix("error:").unwrap_or(text).trim();
    NO_RESULT_ERRORS
        .iter()
        .any(|known| text.eq_ignore_ascii_case(known))
}

/// Trailing identifier of `code` (the part a completion replaces).
fn identifier_prefix(code: &str) -> &str {
    let start = code
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphanumeric() || *c == '_')
        .last()
        .map(|(idx, _)| idx)
        .unwrap_or(code.len());
    &code[start..]
}

pub struct DapAdapter {
    writer: Mutex<FrameWriter<Box<dyn Write + Send>>>,
    seq: AtomicI64,
    shared: Arc<Shared>,
    state: Mutex<TargetState>,
    values: Mutex<ValueTable>,
    child: Mutex<Option<Child>>,
}

impl DapAdapter {
    /// Spawn a debug adapter process and connect to its stdio.
    ///
    /// The adapter gets its own process group, so a SIGINT sent to the kernel group
    /// reaches the target only through the interrupt relay.
    ///
    /// # Arguments
    ///
    /// * `program`: debug adapter executable
    /// * `args`: debug adapter arguments
    pub fn spawn(program: &Path, args: &[String]) -> Result<Self, Error> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .process_group(0)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Launch("adapter stdin is not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Launch("adapter stdout is not captured".into()))?;

        info!(target: "dap", "debug adapter {} started, pid {}", program.display(), child.id());

        let adapter = Self::from_streams(BufReader::new(stdout), stdin)?;
        *adapter.child.lock()? = Some(child);
        Ok(adapter)
    }

    /// Create an adapter over already connected streams.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Result<Self, Error>
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        let shared = Arc::new(Shared::default());
        thread::Builder::new().name("dap-reader".into()).spawn({
            let shared = shared.clone();
            move || reader_loop(FrameReader::new(reader), shared)
        })?;

        let writer: Box<dyn Write + Send> = Box::new(writer);
        Ok(Self {
            writer: Mutex::new(FrameWriter::new(writer)),
            seq: AtomicI64::new(1),
            shared,
            state: Mutex::default(),
            values: Mutex::default(),
            child: Mutex::new(None),
        })
    }

    /// Send a request, return the channel where its response will arrive.
    fn send(&self, command: &str, arguments: Value) -> Result<mpsc::Receiver<DapResponse>, Error> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::sync_channel(1);
        self.shared.pending.lock()?.insert(seq, tx);

        debug!(target: "dap", "-> {seq}: {command}");
        let written = self
            .writer
            .lock()?
            .write_message(&DapRequest::new(seq, command, arguments));
        if let Err(e) = written {
            self.shared.pending.lock()?.remove(&seq);
            return Err(e);
        }
        Ok(rx)
    }

    fn request(&self, command: &str, arguments: Value) -> Result<DapResponse, Error> {
        self.send(command, arguments)?
            .recv()
            .map_err(|_| Error::AdapterClosed)
    }

    /// Send a request and return its body, failed responses are errors.
    fn request_ok(&self, command: &str, arguments: Value) -> Result<Value, Error> {
        let response = self.request(command, arguments)?;
        if !response.success {
            return Err(Error::Request {
                command: command.to_string(),
                message: response.error_text(),
            });
        }
        Ok(response.body)
    }

    fn main_thread(&self) -> Result<ThreadId, Error> {
        self.state
            .lock()?
            .main_thread
            .ok_or_else(|| Error::Launch("target is not launched".into()))
    }

    fn top_frame(&self, thread: ThreadId) -> Result<Option<i64>, Error> {
        let body = self.request_ok(
            "stackTrace",
            json!({"threadId": thread.0, "startFrame": 0, "levels": 1}),
        )?;
        Ok(body["stackFrames"]
            .as_array()
            .and_then(|frames| frames.first())
            .and_then(|frame| frame["id"].as_i64()))
    }

    fn launch_target(
        &self,
        config: &LaunchConfig,
        events: &mpsc::Receiver<DapEvent>,
    ) -> Result<ThreadId, Error> {
        let capabilities = self.request_ok(
            "initialize",
            json!({
                "clientID": "dbgkernel",
                "clientName": "dbgkernel",
                "adapterID": "dbgkernel",
                "linesStartAt1": true,
                "columnsStartAt1": true,
                "pathFormat": "path",
                "supportsMemoryReferences": true,
                "supportsRunInTerminalRequest": false,
            }),
        )?;
        self.state.lock()?.capabilities = capabilities;

        let env = config
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect_vec();
        // adapters answer `launch` only after the configuration is done
        let launch = self.send(
            "launch",
            json!({
                "program": config.program,
                "args": config.args,
                "env": env,
                "cwd": config.cwd,
                "stopOnEntry": false,
            }),
        )?;

        wait_event(events, "initialized")?;

        if let Some(entry) = &config.entry_breakpoint {
            let body = self.request_ok(
                "setFunctionBreakpoints",
                json!({"breakpoints": [{"name": entry}]}),
            )?;
            let verified = body["breakpoints"]
                .as_array()
                .and_then(|bps| bps.first())
                .and_then(|bp| bp["verified"].as_bool())
                .unwrap_or(false);
            if !verified {
                warn!(target: "dap", "entry breakpoint `{entry}` is not verified yet");
            }
        }

        self.request_ok("configurationDone", json!({}))?;

        let response = launch.recv_timeout(LAUNCH_TIMEOUT).map_err(|e| match e {
            RecvTimeoutError::Timeout => Error::Timeout("launch response"),
            RecvTimeoutError::Disconnected => Error::AdapterClosed,
        })?;
        if !response.success {
            return Err(Error::Launch(response.error_text()));
        }

        if config.entry_breakpoint.is_some() {
            wait_event(events, "stopped")?;
        }

        let threads = self.request_ok("threads", json!({}))?;
        let main = threads["threads"]
            .as_array()
            .and_then(|threads| threads.first())
            .and_then(|thread| thread["id"].as_i64())
            .ok_or_else(|| Error::Launch("target has no threads".into()))?;

        info!(target: "dap", "target {} launched, main thread {main}", config.program.display());
        Ok(ThreadId(main))
    }
}

/// Wait for a lifecycle event with the given name, skip others.
fn wait_event(events: &mpsc::Receiver<DapEvent>, name: &'static str) -> Result<DapEvent, Error> {
    let deadline = Instant::now() + LAUNCH_TIMEOUT;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(left) {
            Ok(event) if event.event == name => return Ok(event),
            Ok(event) if event.event == "exited" || event.event == "terminated" => {
                return Err(Error::Launch(format!(
                    "target {} while waiting for `{name}`",
                    event.event
                )))
            }
            Ok(_) => continue,
            Err(RecvTimeoutError::Timeout) => return Err(Error::Timeout(name)),
            Err(RecvTimeoutError::Disconnected) => return Err(Error::AdapterClosed),
        }
    }
}

impl DebugAdapter for DapAdapter {
    fn launch(&self, config: &LaunchConfig) -> Result<ThreadId, Error> {
        let (events_tx, events_rx) = mpsc::channel();
        *self.shared.lifecycle.lock()? = Some(events_tx);
        let result = self.launch_target(config, &events_rx);
        *self.shared.lifecycle.lock()? = None;

        let main = result?;
        self.state.lock()?.main_thread = Some(main);
        Ok(main)
    }

    fn evaluate(&self, code: &str, options: &EvalOptions) -> Result<Evaluation, Error> {
        let mut values = self.values.lock()?;
        values.reset();

        let mut arguments = json!({
            "expression": code,
            "context": EVALUATE_CONTEXT,
            // evaluation options extension, adapters that do not know it ignore it
            "options": {
                "language": options.language,
                "replMode": options.repl_mode,
                "unwindOnError": options.unwind_on_error,
                "generateDebugInfo": options.generate_debug_info,
                "timeoutMicros": options.timeout.map(|t| t.as_micros() as u64).unwrap_or(0),
            },
        });
        if let Some(frame) = self.top_frame(self.main_thread()?)? {
            arguments["frameId"] = json!(frame);
        }

        let response = self.request("evaluate", arguments)?;
        if !response.success && is_no_result(&response) {
            debug!(target: "dap", "evaluate produced no value: {}", response.error_text());
            return Ok(Evaluation::NoValue);
        }
        if !response.success {
            return Ok(Evaluation::Failed(
                values.insert(ValueEntry::error(response.error_text())),
            ));
        }

        let body = response.body;
        let entry = ValueEntry {
            name: None,
            description: body["result"].as_str().unwrap_or_default().to_string(),
            type_name: body["type"]
                .as_str()
                .filter(|t| !t.is_empty())
                .map(ToOwned::to_owned),
            variables_reference: body["variablesReference"].as_i64().unwrap_or(0),
            memory_reference: body["memoryReference"].as_str().map(ToOwned::to_owned),
            error: None,
        };

        if entry.description.is_empty() && entry.type_name.is_none() && entry.variables_reference == 0
        {
            return Ok(Evaluation::NoValue);
        }
        Ok(Evaluation::Value(values.insert(entry)))
    }

    fn describe(&self, value: ValueRef) -> Result<ValueInfo, Error> {
        let values = self.values.lock()?;
        let entry = values.get(value)?;
        Ok(ValueInfo {
            description: entry.description.clone(),
            type_name: entry.type_name.clone(),
            error: entry.error.clone(),
        })
    }

    fn children(&self, value: ValueRef) -> Result<Vec<ValueRef>, Error> {
        let mut values = self.values.lock()?;
        let reference = values.get(value)?.variables_reference;
        if reference == 0 {
            return Ok(vec![]);
        }

        let body = self.request_ok("variables", json!({"variablesReference": reference}))?;
        let variables = body["variables"].as_array().cloned().unwrap_or_default();
        Ok(variables
            .iter()
            .map(|var| values.insert(ValueEntry::from_variable(var)))
            .collect())
    }

    fn child_member(&self, value: ValueRef, name: &str) -> Result<Option<ValueRef>, Error> {
        let children = self.children(value)?;
        let values = self.values.lock()?;
        for child in children {
            if values.get(child)?.name.as_deref() == Some(name) {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    fn value_data(&self, value: ValueRef) -> Result<ValueData, Error> {
        let values = self.values.lock()?;
        let entry = values.get(value)?;
        let scalar = parse_scalar(&entry.description)
            .or_else(|| entry.memory_reference.as_deref().and_then(parse_scalar))
            .ok_or_else(|| Error::NotAScalar(entry.description.clone()))?;

        // adapters report scalars as text, re-encode them as target storage
        Ok(ValueData {
            bytes: scalar.to_le_bytes().to_vec(),
            byte_order: ByteOrder::Little,
            address_size: 8,
        })
    }

    fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>, Error> {
        let body = self.request_ok(
            "readMemory",
            json!({"memoryReference": format!("{addr:#x}"), "offset": 0, "count": len}),
        )?;
        let data = body["data"].as_str().unwrap_or_default();
        let mut bytes = BASE64_STANDARD
            .decode(data)
            .map_err(|e| Error::Protocol(format!("readMemory payload: {e}")))?;

        if bytes.len() < len {
            return Err(Error::ShortRead {
                addr,
                expected: len,
                got: bytes.len(),
            });
        }
        bytes.truncate(len);
        Ok(bytes)
    }

    fn read_stdout(&self, max_len: usize) -> Result<String, Error> {
        let mut stdout = self.shared.stdout.lock()?;
        if stdout.len() <= max_len {
            return Ok(std::mem::take(&mut *stdout));
        }

        let mut cut = max_len;
        while !stdout.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            // chunk is smaller than a single character, give out the whole character
            cut = stdout
                .char_indices()
                .nth(1)
                .map(|(idx, _)| idx)
                .unwrap_or(stdout.len());
        }
        let rest = stdout.split_off(cut);
        Ok(std::mem::replace(&mut *stdout, rest))
    }

    fn frames(&self, thread: ThreadId) -> Result<Vec<FrameInfo>, Error> {
        let body = self.request_ok("stackTrace", json!({"threadId": thread.0}))?;
        let frames = body["stackFrames"].as_array().cloned().unwrap_or_default();

        Ok(frames
            .iter()
            .enumerate()
            .map(|(idx, frame)| {
                let name = frame["name"].as_str().unwrap_or("???");
                let line = frame["line"].as_u64().filter(|line| *line > 0);
                let file = frame["source"]["path"]
                    .as_str()
                    .or_else(|| frame["source"]["name"].as_str())
                    .filter(|_| line.is_some())
                    .map(PathBuf::from);

                let description = match (&file, line) {
                    (Some(file), Some(line)) => {
                        let column = frame["column"].as_u64().unwrap_or(0);
                        format!("frame #{idx}: {name} at {}:{line}:{column}", file.display())
                    }
                    _ => format!("frame #{idx}: {name}"),
                };

                FrameInfo {
                    description,
                    file,
                    line,
                }
            })
            .collect())
    }

    fn send_async_interrupt(&self) -> Result<(), Error> {
        let pid = *self.shared.debugee_pid.lock()?;
        if let Some(pid) = pid {
            debug!(target: "dap", "send SIGINT to target {pid}");
            return kill(pid, Signal::SIGINT).map_err(|e| Error::Syscall("kill", e));
        }

        let thread = self.main_thread()?;
        debug!(target: "dap", "pause target thread {}", thread.0);
        // response is not awaited, the adapter answers after the evaluation unwinds
        _ = self.send("pause", json!({"threadId": thread.0}))?;
        Ok(())
    }

    fn supports_completion(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.capabilities["supportsCompletionsRequest"].as_bool() == Some(true))
            .unwrap_or(false)
    }

    fn complete(&self, _language: &str, code: &str) -> Result<Completion, Error> {
        let line = code.split('\n').count();
        let column = code.rsplit('\n').next().unwrap_or_default().chars().count() + 1;
        let mut arguments = json!({"text": code, "line": line, "column": column});
        if let Some(frame) = self.top_frame(self.main_thread()?)? {
            arguments["frameId"] = json!(frame);
        }

        let body = self.request_ok("completions", arguments)?;
        let prefix = identifier_prefix(code);
        let insertables = body["targets"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|target| target["text"].as_str().or_else(|| target["label"].as_str()))
            .map(|text| text.strip_prefix(prefix).unwrap_or(text).to_string())
            .collect();

        Ok(Completion {
            prefix: prefix.to_string(),
            insertables,
        })
    }

    fn terminate(&self) -> Result<(), Error> {
        if let Err(e) = self.request_ok("disconnect", json!({"terminateDebuggee": true})) {
            warn!(target: "dap", "disconnect: {e:#}");
        }
        if let Some(mut child) = self.child.lock()?.take() {
            _ = child.kill();
            _ = child.wait();
        }
        Ok(())
    }
}
