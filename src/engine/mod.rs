//! Execution engine: submits cell source to the target and classifies the outcome.

pub mod preprocess;

use crate::adapter::{Evaluation, ValueRef};
use crate::dialect::Dialect;
use crate::error::Error;
use crate::iopub::IoPub;
use crate::messages;
use crate::relay::{OutputRelay, RelayConfig};
use crate::session::SessionHandle;
use log::debug;
pub use preprocess::{CompletionSwitch, PreprocessError, Preprocessor};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Value produced by an evaluation. Description and type are captured at classification time,
/// the handle is valid until the next evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetValue {
    pub handle: ValueRef,
    pub description: String,
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    SuccessWithoutValue,
    SuccessWithValue(TargetValue),
    PreprocessorError(PreprocessError),
    RuntimeError(TargetValue),
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ExecutionResult::SuccessWithoutValue | ExecutionResult::SuccessWithValue(_)
        )
    }

    /// Text of the failure, `None` for successful results.
    pub fn error_description(&self) -> Option<String> {
        match self {
            ExecutionResult::PreprocessorError(e) => Some(e.to_string()),
            ExecutionResult::RuntimeError(value) => Some(value.description.clone()),
            _ => None,
        }
    }
}

impl Display for ExecutionResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionResult::SuccessWithoutValue => f.write_str("SuccessWithoutValue"),
            ExecutionResult::SuccessWithValue(v) => write!(f, "SuccessWithValue({})", v.description),
            ExecutionResult::PreprocessorError(e) => write!(f, "PreprocessorError({e})"),
            ExecutionResult::RuntimeError(v) => write!(f, "RuntimeError({})", v.description),
        }
    }
}

/// Result of a single cell together with side channel facts.
#[derive(Debug, Clone, PartialEq)]
pub struct CellOutcome {
    pub result: ExecutionResult,
    /// Target wrote to stdout while the cell was evaluated.
    pub had_stdout: bool,
}

/// Cell execution counter, incremented by the protocol layer.
#[derive(Debug, Clone, Default)]
pub struct ExecutionCounter(Arc<AtomicU32>);

impl ExecutionCounter {
    pub fn current(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    /// Increment the counter and return the new value.
    pub fn increment(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Synthetic source file name of the current cell.
    pub fn cell_file_name(&self) -> String {
        format!("<Cell {}>", self.current())
    }
}

pub struct Engine {
    session: Arc<SessionHandle>,
    iopub: Arc<dyn IoPub>,
    dialect: Arc<dyn Dialect>,
    preprocessor: Preprocessor,
    counter: ExecutionCounter,
    relay: RelayConfig,
}

impl Engine {
    pub fn new(
        session: Arc<SessionHandle>,
        iopub: Arc<dyn IoPub>,
        dialect: Arc<dyn Dialect>,
        preprocessor: Preprocessor,
        counter: ExecutionCounter,
        relay: RelayConfig,
    ) -> Self {
        Self {
            session,
            iopub,
            dialect,
            preprocessor,
            counter,
            relay,
        }
    }

    pub fn session(&self) -> &Arc<SessionHandle> {
        &self.session
    }

    pub fn iopub(&self) -> &dyn IoPub {
        self.iopub.as_ref()
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn counter(&self) -> &ExecutionCounter {
        &self.counter
    }

    /// Run a notebook cell.
    ///
    /// Target stdout is streamed while the cell runs, including the display message drain.
    /// Display messages queued by a successful cell are published before return.
    ///
    /// # Arguments
    ///
    /// * `source`: cell source
    /// * `parent`: metadata of the request that triggered the execution
    pub fn execute_cell(&self, source: &str, parent: &Value) -> Result<CellOutcome, Error> {
        self.update_context(parent)?;

        let code = match self.preprocessor.preprocess(source, &self.counter.cell_file_name()) {
            Ok(code) => code,
            Err(e) => {
                return Ok(CellOutcome {
                    result: ExecutionResult::PreprocessorError(e),
                    had_stdout: false,
                })
            }
        };

        let relay = OutputRelay::start(self.session.clone(), self.iopub.clone(), self.relay)?;
        let result = self.execute(&code)?;
        // output of the cell itself, the drain below may print too
        let had_stdout = relay.flush();

        if result.is_success() {
            messages::publish_messages(self);
        }
        relay.stop_and_join();

        Ok(CellOutcome { result, had_stdout })
    }

    /// Preprocess and execute code without output streaming.
    pub fn preprocess_and_execute(&self, source: &str) -> Result<ExecutionResult, Error> {
        match self
            .preprocessor
            .preprocess(source, &self.counter.cell_file_name())
        {
            Ok(code) => self.execute(&code),
            Err(e) => Ok(ExecutionResult::PreprocessorError(e)),
        }
    }

    /// Execute already preprocessed code and classify the outcome.
    pub fn execute(&self, code: &str) -> Result<ExecutionResult, Error> {
        let location = self
            .dialect
            .source_location(&self.counter.cell_file_name(), 1);
        let evaluation = self.session.evaluate(&format!("{location}\n{code}"))?;
        debug!(target: "kernel", "evaluation finished: {evaluation:?}");

        Ok(match evaluation {
            Evaluation::NoValue => ExecutionResult::SuccessWithoutValue,
            Evaluation::Value(handle) => {
                let info = self.session.describe(handle)?;
                ExecutionResult::SuccessWithValue(TargetValue {
                    handle,
                    description: info.description,
                    type_name: info.type_name,
                })
            }
            Evaluation::Failed(handle) => {
                let info = self.session.describe(handle)?;
                ExecutionResult::RuntimeError(TargetValue {
                    handle,
                    description: info.error.unwrap_or(info.description),
                    type_name: info.type_name,
                })
            }
        })
    }

    /// Hand the request metadata to the target-side communicator.
    fn update_context(&self, parent: &Value) -> Result<(), Error> {
        let snippet = self.dialect.update_context(&serde_json::to_string(parent)?);
        let result = self.execute(&snippet)?;
        match result.error_description() {
            None => Ok(()),
            Some(description) => Err(Error::UnexpectedResult {
                snippet: "update request context".to_string(),
                result: description,
            }),
        }
    }
}
