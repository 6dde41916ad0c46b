//! Debug adapter capability.
//!
//! The kernel never talks to a debugger directly. Everything it needs from the target process
//! (evaluation, value introspection, memory, frames, captured output, interrupts) goes through
//! the [`DebugAdapter`] trait. [`dap::DapAdapter`] implements it on top of an external
//! Debug Adapter Protocol server.

pub mod dap;

use crate::error::Error;
use std::path::PathBuf;
use std::time::Duration;

/// Thread identifier inside the target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub i64);

/// Non-owning handle of a value that lives in the target process.
///
/// Handles are scoped to one evaluation: adapters invalidate every handle of the previous
/// `generation` as soon as a new evaluation begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRef {
    pub id: u64,
    pub generation: u64,
}

impl ValueRef {
    pub fn new(id: u64, generation: u64) -> Self {
        Self { id, generation }
    }
}

/// Outcome of a single expression evaluation, as reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// Code ran and produced no value.
    NoValue,
    /// Code ran and produced a value.
    Value(ValueRef),
    /// Compile or runtime fault, the handle carries the error.
    Failed(ValueRef),
}

/// Human-readable information about a value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueInfo {
    pub description: String,
    pub type_name: Option<String>,
    /// Error text, present for values produced by failed evaluations.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Width of the target's native integer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    W32,
    W64,
}

impl IntWidth {
    pub fn bytes(self) -> usize {
        match self {
            IntWidth::W32 => 4,
            IntWidth::W64 => 8,
        }
    }
}

impl TryFrom<u32> for IntWidth {
    type Error = Error;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        match bits {
            32 => Ok(IntWidth::W32),
            64 => Ok(IntWidth::W64),
            _ => Err(Error::UnsupportedBitWidth(bits)),
        }
    }
}

/// Raw storage of a value in the target process.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueData {
    pub bytes: Vec<u8>,
    pub byte_order: ByteOrder,
    /// Pointer size in bytes.
    pub address_size: usize,
}

impl ValueData {
    /// Read a pointer stored at `offset`.
    pub fn read_address(&self, offset: usize) -> Result<u64, Error> {
        let raw = self.slice(offset, self.address_size, "address")?;
        match self.address_size {
            4 => Ok(self.decode_u32(raw) as u64),
            8 => Ok(self.decode_u64(raw)),
            _ => Err(Error::TypeBinaryRepr("address", raw.into())),
        }
    }

    /// Read a signed integer of the given width stored at `offset`.
    pub fn read_signed(&self, offset: usize, width: IntWidth) -> Result<i64, Error> {
        let raw = self.slice(offset, width.bytes(), "integer")?;
        Ok(match width {
            IntWidth::W32 => self.decode_u32(raw) as i32 as i64,
            IntWidth::W64 => self.decode_u64(raw) as i64,
        })
    }

    fn slice(&self, offset: usize, len: usize, what: &'static str) -> Result<&[u8], Error> {
        self.bytes
            .get(offset..offset + len)
            .ok_or_else(|| Error::TypeBinaryRepr(what, self.bytes.clone().into_boxed_slice()))
    }

    fn decode_u32(&self, raw: &[u8]) -> u32 {
        let arr: [u8; 4] = [raw[0], raw[1], raw[2], raw[3]];
        match self.byte_order {
            ByteOrder::Little => u32::from_le_bytes(arr),
            ByteOrder::Big => u32::from_be_bytes(arr),
        }
    }

    fn decode_u64(&self, raw: &[u8]) -> u64 {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&raw[..8]);
        match self.byte_order {
            ByteOrder::Little => u64::from_le_bytes(arr),
            ByteOrder::Big => u64::from_be_bytes(arr),
        }
    }
}

/// Single stack frame of a target thread.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    /// Textual frame representation, the way the adapter prints it.
    pub description: String,
    /// Full path of the frame source file, `None` if there is no line information.
    pub file: Option<PathBuf>,
    pub line: Option<u64>,
}

/// Code completion response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    /// Part of the code before the cursor that every match replaces.
    pub prefix: String,
    /// Text to insert after the prefix.
    pub insertables: Vec<String>,
}

/// Options of expression evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOptions {
    /// Target language identifier.
    pub language: String,
    pub repl_mode: bool,
    pub unwind_on_error: bool,
    pub generate_debug_info: bool,
    /// `None` means no timeout at all.
    pub timeout: Option<Duration>,
}

impl EvalOptions {
    /// Options used for every cell: REPL semantics, keep the stack on errors,
    /// emit debug info and never time out.
    pub fn repl(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            repl_mode: true,
            unwind_on_error: false,
            generate_debug_info: true,
            timeout: None,
        }
    }

    pub fn with_timeout(self, timeout: Option<Duration>) -> Self {
        Self { timeout, ..self }
    }
}

/// Target process launch parameters.
#[derive(Debug, Clone, Default)]
pub struct LaunchConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Function where the target stops before the first evaluation.
    pub entry_breakpoint: Option<String>,
}

/// Capabilities the kernel consumes from a debugger.
///
/// Implementations must allow [`DebugAdapter::read_stdout`] and
/// [`DebugAdapter::send_async_interrupt`] to be called from other threads while
/// [`DebugAdapter::evaluate`] blocks.
pub trait DebugAdapter: Send + Sync {
    /// Launch the target and stop it at the entry breakpoint. Return the main thread.
    fn launch(&self, config: &LaunchConfig) -> Result<ThreadId, Error>;

    /// Evaluate code in the stopped target. Blocks until the evaluation is finished.
    fn evaluate(&self, code: &str, options: &EvalOptions) -> Result<Evaluation, Error>;

    fn describe(&self, value: ValueRef) -> Result<ValueInfo, Error>;

    /// Ordered children of a collection-like value.
    fn children(&self, value: ValueRef) -> Result<Vec<ValueRef>, Error>;

    /// Named member of an aggregate value.
    fn child_member(&self, value: ValueRef, name: &str) -> Result<Option<ValueRef>, Error>;

    fn value_data(&self, value: ValueRef) -> Result<ValueData, Error>;

    /// Read exactly `len` bytes at `addr`, `len` must be positive.
    fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>, Error>;

    /// Take at most `max_len` bytes of captured target stdout. Empty string means nothing
    /// is buffered right now.
    fn read_stdout(&self, max_len: usize) -> Result<String, Error>;

    /// Thread frames, innermost first.
    fn frames(&self, thread: ThreadId) -> Result<Vec<FrameInfo>, Error>;

    /// Ask the target to unwind the current evaluation. Must not block.
    fn send_async_interrupt(&self) -> Result<(), Error>;

    fn supports_completion(&self) -> bool {
        false
    }

    fn complete(&self, _language: &str, _code: &str) -> Result<Completion, Error> {
        Err(Error::Unsupported("code completion"))
    }

    /// Kill the target process and release adapter resources.
    fn terminate(&self) -> Result<(), Error> {
        Ok(())
    }
}
