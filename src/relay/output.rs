use crate::error::Error;
use crate::iopub::{IoPub, Notification};
use crate::session::SessionHandle;
use log::{debug, error, warn};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// How often captured output is drained while an evaluation runs.
    pub poll_interval: Duration,
    /// Maximum bytes taken from the adapter per read.
    pub chunk_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            chunk_size: 1000,
        }
    }
}

/// Streams target stdout to the broadcast channel while a cell is evaluated.
///
/// Dropping a relay without [`OutputRelay::stop_and_join`] still stops the thread
/// and waits for the final drain.
pub struct OutputRelay {
    drain: Arc<Drain>,
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<bool>>,
}

impl OutputRelay {
    /// Start relaying. Output left over from earlier evaluations is published first and
    /// does not count as output of this relay.
    pub fn start(
        session: Arc<SessionHandle>,
        iopub: Arc<dyn IoPub>,
        config: RelayConfig,
    ) -> Result<Self, Error> {
        let drain = Arc::new(Drain {
            session,
            iopub,
            chunk_size: config.chunk_size,
            had_output: Mutex::new(false),
        });
        if drain.publish_pending() {
            debug!(target: "relay", "published output left by an earlier evaluation");
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("output-relay".to_string())
            .spawn({
                let drain = drain.clone();
                move || relay_loop(&drain, config.poll_interval, stop_rx)
            })?;

        Ok(Self {
            drain,
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Drain buffered output now. Return `true` if any output was relayed so far.
    pub fn flush(&self) -> bool {
        self.drain.run()
    }

    /// Stop the relay, wait for the final drain. Return `true` if any output was relayed.
    pub fn stop_and_join(mut self) -> bool {
        self.finish()
    }

    fn finish(&mut self) -> bool {
        if let Some(stop) = self.stop.take() {
            _ = stop.send(());
        }
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(had_output)) => had_output,
            Some(Err(_)) => {
                error!(target: "relay", "output relay thread panicked");
                self.drain.run()
            }
            None => false,
        }
    }
}

impl Drop for OutputRelay {
    fn drop(&mut self) {
        self.finish();
    }
}

fn relay_loop(drain: &Drain, poll_interval: Duration, stop: mpsc::Receiver<()>) -> bool {
    loop {
        let stopped = match stop.recv_timeout(poll_interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        };

        // last drain happens after the stop signal
        let had_output = drain.run();
        if stopped {
            debug!(target: "relay", "output relay stopped");
            return had_output;
        }
    }
}

/// Drain shared by the relay thread and its owner.
struct Drain {
    session: Arc<SessionHandle>,
    iopub: Arc<dyn IoPub>,
    chunk_size: usize,
    /// Held during a drain, so chunks are published in order.
    had_output: Mutex<bool>,
}

impl Drain {
    /// Publish buffered output, return `true` if any output was relayed so far.
    fn run(&self) -> bool {
        let mut had_output = self
            .had_output
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *had_output |= self.publish_pending();
        *had_output
    }

    /// Take all buffered output and publish it as one stream message.
    fn publish_pending(&self) -> bool {
        let mut text = String::new();
        loop {
            match self.session.read_stdout(self.chunk_size) {
                Ok(chunk) if chunk.is_empty() => break,
                Ok(chunk) => text.push_str(&chunk),
                Err(e) => {
                    warn!(target: "relay", "read target stdout: {e:#}");
                    break;
                }
            }
        }

        if text.is_empty() {
            return false;
        }
        if let Err(e) = self.iopub.publish(Notification::stdout(text)) {
            warn!(target: "relay", "publish target stdout: {e:#}");
        }
        true
    }
}
