//! Debug session handle: the only owner of the target process.

use crate::adapter::{
    Completion, DebugAdapter, EvalOptions, Evaluation, FrameInfo, IntWidth, LaunchConfig,
    ThreadId, ValueData, ValueInfo, ValueRef,
};
use crate::error::Error;
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Handle of a launched target process.
///
/// Evaluations and memory reads are serialized by an internal lock. [`SessionHandle::read_stdout`]
/// and [`SessionHandle::interrupt`] do not take that lock and may be called from relay threads
/// while an evaluation is in flight.
pub struct SessionHandle {
    adapter: Arc<dyn DebugAdapter>,
    main_thread: ThreadId,
    options: EvalOptions,
    eval_lock: Mutex<()>,
    in_flight: AtomicBool,
    int_width: OnceLock<IntWidth>,
}

/// Marks an evaluation as in flight until dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SessionHandle {
    /// Launch the target and stop it at the entry breakpoint.
    pub fn launch(
        adapter: Arc<dyn DebugAdapter>,
        config: &LaunchConfig,
        options: EvalOptions,
    ) -> Result<Self, Error> {
        let main_thread = adapter.launch(config)?;
        Ok(Self {
            adapter,
            main_thread,
            options,
            eval_lock: Mutex::new(()),
            in_flight: AtomicBool::new(false),
            int_width: OnceLock::new(),
        })
    }

    pub fn options(&self) -> &EvalOptions {
        &self.options
    }

    /// Evaluate code with the session evaluation options. Blocks until the target is done.
    pub fn evaluate(&self, code: &str) -> Result<Evaluation, Error> {
        let _guard = self.eval_lock.lock()?;
        let _in_flight = InFlight::enter(&self.in_flight);
        self.adapter.evaluate(code, &self.options)
    }

    pub fn describe(&self, value: ValueRef) -> Result<ValueInfo, Error> {
        self.adapter.describe(value)
    }

    pub fn children(&self, value: ValueRef) -> Result<Vec<ValueRef>, Error> {
        self.adapter.children(value)
    }

    /// Named member of an aggregate, a missing member is an error.
    pub fn child_member(&self, value: ValueRef, name: &'static str) -> Result<ValueRef, Error> {
        self.adapter
            .child_member(value, name)?
            .ok_or(Error::MissingMember(name))
    }

    pub fn value_data(&self, value: ValueRef) -> Result<ValueData, Error> {
        self.adapter.value_data(value)
    }

    pub fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>, Error> {
        let _guard = self.eval_lock.lock()?;
        self.adapter.read_memory(addr, len)
    }

    pub fn read_stdout(&self, max_len: usize) -> Result<String, Error> {
        self.adapter.read_stdout(max_len)
    }

    /// Ask the target to unwind the in-flight evaluation. Does nothing when the target is idle.
    pub fn interrupt(&self) -> Result<(), Error> {
        if !self.in_flight.load(Ordering::SeqCst) {
            debug!(target: "kernel", "interrupt ignored, no evaluation in flight");
            return Ok(());
        }
        self.adapter.send_async_interrupt()
    }

    pub fn is_evaluating(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Frames of the target main thread, innermost first.
    pub fn main_thread_frames(&self) -> Result<Vec<FrameInfo>, Error> {
        self.adapter.frames(self.main_thread)
    }

    /// Remember the target integer width, may be set only once.
    pub fn set_int_width(&self, width: IntWidth) {
        if self.int_width.set(width).is_err() {
            debug!(target: "kernel", "integer width already probed");
        }
    }

    pub fn int_width(&self) -> Result<IntWidth, Error> {
        self.int_width.get().copied().ok_or(Error::BitWidthUnknown)
    }

    pub fn supports_completion(&self) -> bool {
        self.adapter.supports_completion()
    }

    pub fn complete(&self, code: &str) -> Result<Completion, Error> {
        let _guard = self.eval_lock.lock()?;
        self.adapter.complete(&self.options.language, code)
    }

    pub fn terminate(&self) -> Result<(), Error> {
        self.adapter.terminate()
    }
}
