//! Notebook kernel driving a long-lived interpreter process through a debug adapter.
//!
//! Cells are preprocessed ([`engine::preprocess`]), evaluated in the target through the
//! [`adapter::DebugAdapter`] capability and classified into [`engine::ExecutionResult`].
//! Target stdout and interrupt requests are relayed by background threads ([`relay`]),
//! display messages queued by the target are copied out of its memory ([`messages`]).

pub mod adapter;
pub mod config;
pub mod diagnostics;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod frontend;
pub mod iopub;
pub mod kernel;
pub mod log;
pub mod messages;
pub mod relay;
pub mod session;

pub use error::Error;
pub use kernel::{CompleteReply, ExecuteReply, Kernel, KernelSettings};
