//! Protocol boundary of the kernel: startup, cell execution replies, code completion.

use crate::adapter::{DebugAdapter, EvalOptions, IntWidth, LaunchConfig};
use crate::diagnostics;
use crate::dialect::{Dialect, SessionIdentity};
use crate::engine::{
    CompletionSwitch, Engine, ExecutionCounter, ExecutionResult, Preprocessor,
};
use crate::error::Error;
use crate::iopub::{ErrorContent, IoPub, Notification};
use crate::relay::RelayConfig;
use crate::session::SessionHandle;
use crate::weak_error;
use log::{error, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const BAD_STATE: &str = "Kernel is in a bad state. Try restarting the kernel.";

/// Everything the kernel needs to start, besides its collaborators.
#[derive(Debug, Clone, Default)]
pub struct KernelSettings {
    pub launch: LaunchConfig,
    pub identity: SessionIdentity,
    /// Additional `%include` roots, searched after the default ones.
    pub include_roots: Vec<PathBuf>,
    pub relay: RelayConfig,
    /// Evaluation time limit, `None` for unbounded evaluations.
    pub eval_timeout: Option<Duration>,
}

/// Reply to an execute request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecuteReply {
    Ok {
        execution_count: u32,
        payload: Vec<Value>,
        user_expressions: Map<String, Value>,
    },
    Error {
        execution_count: u32,
        #[serde(flatten)]
        content: ErrorContent,
    },
}

impl ExecuteReply {
    fn ok(execution_count: u32) -> Self {
        ExecuteReply::Ok {
            execution_count,
            payload: vec![],
            user_expressions: Map::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ExecuteReply::Ok { .. })
    }

    /// Traceback of an error reply, empty for successful replies.
    pub fn traceback(&self) -> &[String] {
        match self {
            ExecuteReply::Ok { .. } => &[],
            ExecuteReply::Error { content, .. } => &content.traceback,
        }
    }
}

/// Reply to a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompleteReply {
    pub status: &'static str,
    pub matches: Vec<String>,
    pub cursor_start: usize,
    pub cursor_end: usize,
}

impl CompleteReply {
    /// Reply without matches.
    pub fn empty(cursor_pos: usize) -> Self {
        Self {
            status: "ok",
            matches: vec![],
            cursor_start: cursor_pos,
            cursor_end: cursor_pos,
        }
    }
}

pub struct Kernel {
    engine: Engine,
    completion: Arc<CompletionSwitch>,
}

impl Kernel {
    /// Launch the target and prepare it for cell execution.
    ///
    /// The target-side communicator is included and declared, then the native integer width
    /// is probed. Any failure aborts the start.
    pub fn start(
        adapter: Arc<dyn DebugAdapter>,
        iopub: Arc<dyn IoPub>,
        dialect: Arc<dyn Dialect>,
        settings: KernelSettings,
    ) -> Result<Self, Error> {
        let options =
            EvalOptions::repl(dialect.language_id()).with_timeout(settings.eval_timeout);
        let session = Arc::new(SessionHandle::launch(adapter, &settings.launch, options)?);

        let completion = Arc::new(CompletionSwitch::new(session.supports_completion()));
        let preprocessor = Preprocessor::new(
            settings.include_roots,
            completion.clone(),
            iopub.clone(),
            dialect.clone(),
        );
        let engine = Engine::new(
            session,
            iopub,
            dialect,
            preprocessor,
            ExecutionCounter::default(),
            settings.relay,
        );

        let kernel = Self { engine, completion };
        kernel.init_communicator(&settings.identity)?;
        kernel.init_int_width()?;
        info!(target: "kernel", "kernel started");
        Ok(kernel)
    }

    fn init_communicator(&self, identity: &SessionIdentity) -> Result<(), Error> {
        let dialect = self.engine.dialect();
        let Some(include) = dialect.communicator_include() else {
            return Ok(());
        };

        let result = self
            .engine
            .preprocess_and_execute(&format!("%include \"{include}\""))?;
        if let Some(description) = result.error_description() {
            return Err(Error::Startup(format!(
                "Error initing communicator: {description}"
            )));
        }

        let result = self
            .engine
            .preprocess_and_execute(&dialect.session_declaration(identity))?;
        if let Some(description) = result.error_description() {
            return Err(Error::Startup(format!(
                "Error declaring session: {description}"
            )));
        }
        Ok(())
    }

    fn init_int_width(&self) -> Result<(), Error> {
        let probe = self.engine.dialect().int_width_probe();
        let result = self.engine.execute(probe)?;
        let ExecutionResult::SuccessWithValue(value) = result else {
            return Err(Error::Startup(format!(
                "Expected value from {probe}, but got: {result}"
            )));
        };

        let bits: u32 =
            value
                .description
                .trim()
                .parse()
                .map_err(|_| Error::UnexpectedResult {
                    snippet: probe.to_string(),
                    result: value.description.clone(),
                })?;
        let width = IntWidth::try_from(bits)?;
        info!(target: "kernel", "target integer width: {bits} bits");
        self.engine.session().set_int_width(width);
        Ok(())
    }

    pub fn session(&self) -> &Arc<SessionHandle> {
        self.engine.session()
    }

    pub fn counter(&self) -> &ExecutionCounter {
        self.engine.counter()
    }

    /// Execute a cell, publish its result or error and return the reply.
    ///
    /// # Arguments
    ///
    /// * `code`: cell source
    /// * `parent`: header of the request that triggered the execution
    pub fn execute(&self, code: &str, parent: &Value) -> ExecuteReply {
        let execution_count = self.counter().current();

        let outcome = match self.engine.execute_cell(code, parent) {
            Ok(outcome) => outcome,
            Err(e) => return self.report_bad_state("execute_cell", &e),
        };

        match outcome.result {
            ExecutionResult::SuccessWithValue(value) => {
                weak_error!(
                    self.engine
                        .iopub()
                        .publish(Notification::plain_result(execution_count, value.description)),
                    "publish execution result:"
                );
                ExecuteReply::ok(execution_count)
            }
            ExecutionResult::SuccessWithoutValue => ExecuteReply::ok(execution_count),
            ExecutionResult::PreprocessorError(e) => self.report_error(vec![e.to_string()]),
            ExecutionResult::RuntimeError(value) => {
                if !outcome.had_stdout {
                    // no output means a compile error, there is no interesting stack
                    return self.report_error(vec![value.description]);
                }

                // runtime error message already went to stdout, add a stack trace
                let frames = match diagnostics::main_thread_trace(self.session()) {
                    Ok(frames) => frames,
                    Err(e) => return self.report_bad_state("main_thread_trace", &e),
                };
                let mut traceback = vec!["Current stack trace:".to_string()];
                traceback.extend(frames.into_iter().map(|frame| format!("\t{frame}")));
                self.report_error(traceback)
            }
        }
    }

    fn report_error(&self, traceback: Vec<String>) -> ExecuteReply {
        let content = ErrorContent::new(traceback);
        weak_error!(
            self.engine
                .iopub()
                .publish(Notification::Error(content.clone())),
            "publish error:"
        );
        ExecuteReply::Error {
            execution_count: self.counter().current(),
            content,
        }
    }

    fn report_bad_state(&self, operation: &str, e: &Error) -> ExecuteReply {
        error!(target: "kernel", "{operation}: {e:#} (fatal: {})", e.is_fatal());
        self.report_error(vec![
            BAD_STATE.to_string(),
            String::new(),
            format!("Exception in `{operation}`:"),
            e.to_string(),
        ])
    }

    /// Complete code at the cursor. Return `None` if completion is not enabled, a failed
    /// completion request gives an empty match list.
    ///
    /// # Arguments
    ///
    /// * `code`: cell source
    /// * `cursor_pos`: cursor position in characters
    pub fn complete(&self, code: &str, cursor_pos: usize) -> Option<CompleteReply> {
        if !self.completion.is_enabled() {
            return None;
        }

        let code_to_cursor: String = code.chars().take(cursor_pos).collect();
        let completion = match self.session().complete(&code_to_cursor) {
            Ok(completion) => completion,
            Err(e) => {
                warn!(target: "kernel", "code completion: {e:#}");
                return Some(CompleteReply::empty(cursor_pos));
            }
        };

        let prefix = completion.prefix;
        let matches = completion
            .insertables
            .into_iter()
            .map(|insertable| format!("{prefix}{insertable}"))
            .filter(|candidate| !candidate.starts_with('_'))
            .collect();

        Some(CompleteReply {
            status: "ok",
            matches,
            cursor_start: cursor_pos.saturating_sub(prefix.chars().count()),
            cursor_end: cursor_pos,
        })
    }

    /// Kill the target process.
    pub fn shutdown(&self) -> Result<(), Error> {
        info!(target: "kernel", "shutdown");
        self.session().terminate()
    }
}
