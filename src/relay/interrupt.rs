use crate::error::Error;
use crate::session::SessionHandle;
use crate::weak_error;
use log::{error, info};
use nix::sys::signal::{SigSet, Signal};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

/// Block SIGINT in the calling thread and in every thread spawned after.
///
/// Must be called before any other thread starts, otherwise SIGINT may be delivered
/// to a thread that does not expect it.
pub fn block_interrupt_signal() -> Result<(), Error> {
    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.thread_block()
        .map_err(|e| Error::Syscall("pthread_sigmask", e))
}

/// Source of user interrupt requests.
pub trait InterruptSource: Send {
    /// Block until the next interrupt request.
    fn wait(&mut self) -> Result<(), Error>;
}

/// Synchronously waits for SIGINT (blocked with [`block_interrupt_signal`]).
pub struct SignalSource {
    set: SigSet,
}

impl SignalSource {
    pub fn new() -> Self {
        let mut set = SigSet::empty();
        set.add(Signal::SIGINT);
        Self { set }
    }
}

impl Default for SignalSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptSource for SignalSource {
    fn wait(&mut self) -> Result<(), Error> {
        self.set
            .wait()
            .map(|_| ())
            .map_err(|e| Error::Syscall("sigwait", e))
    }
}

/// Interrupt requests sent by an embedder, closing the channel stops the relay.
impl InterruptSource for mpsc::Receiver<()> {
    fn wait(&mut self) -> Result<(), Error> {
        self.recv().map_err(|_| Error::InterruptSourceClosed)
    }
}

/// Forwards interrupt requests to the target for the whole kernel lifetime.
pub struct InterruptRelay {
    handle: JoinHandle<()>,
}

impl InterruptRelay {
    pub fn spawn<S: InterruptSource + 'static>(
        session: Arc<SessionHandle>,
        mut source: S,
    ) -> Result<Self, Error> {
        let handle = thread::Builder::new()
            .name("interrupt-relay".to_string())
            .spawn(move || loop {
                match source.wait() {
                    Ok(()) => {
                        info!(target: "relay", "interrupt requested");
                        weak_error!(session.interrupt(), "interrupt target:");
                    }
                    Err(Error::InterruptSourceClosed) => {
                        info!(target: "relay", "interrupt source closed, relay stopped");
                        return;
                    }
                    Err(e) => error!(target: "relay", "wait for interrupt: {e:#}"),
                }
            })?;

        Ok(Self { handle })
    }

    /// Wait until the relay stops (only happens when the source is closed).
    pub fn join(self) {
        if self.handle.join().is_err() {
            error!(target: "relay", "interrupt relay thread panicked");
        }
    }
}
