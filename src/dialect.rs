//! Target language snippets emitted by the kernel.

/// Notebook session identity, handed to the target at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIdentity {
    pub id: String,
    pub key: String,
    pub username: String,
}

/// Source text the kernel injects into the target process.
///
/// Implementations must produce code that the target interpreter accepts in REPL mode.
pub trait Dialect: Send + Sync {
    /// Language identifier passed to the debug adapter.
    fn language_id(&self) -> &str;

    /// Directive that remaps diagnostics of the following lines to `file` starting at `line`.
    fn source_location(&self, file: &str, line: usize) -> String;

    /// Expression whose value is the bit width of the native integer type.
    fn int_width_probe(&self) -> &str;

    /// Expression returning the queued display messages and clearing the queue.
    fn drain_messages(&self) -> &str;

    /// Statement updating the current request context inside the target.
    ///
    /// # Arguments
    ///
    /// * `context_json`: request context serialized as JSON text
    fn update_context(&self, context_json: &str) -> String;

    /// Declaration of the session object used by the target-side communicator.
    fn session_declaration(&self, identity: &SessionIdentity) -> String;

    /// Name of the include file with the target-side communicator, if any.
    fn communicator_include(&self) -> Option<&str>;
}

/// Quote a string as a string literal (JSON escaping is valid for Swift literals).
fn quoted(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

/// Swift REPL dialect.
#[derive(Debug, Default, Clone, Copy)]
pub struct SwiftDialect;

impl Dialect for SwiftDialect {
    fn language_id(&self) -> &str {
        "swift"
    }

    fn source_location(&self, file: &str, line: usize) -> String {
        format!("#sourceLocation(file: \"{file}\", line: {line})")
    }

    fn int_width_probe(&self) -> &str {
        "Int.bitWidth"
    }

    fn drain_messages(&self) -> &str {
        "JupyterKernel.communicator.triggerAfterSuccessfulExecution()"
    }

    fn update_context(&self, context_json: &str) -> String {
        format!(
            "JupyterKernel.communicator.updateParentMessage(\n    to: KernelCommunicator.ParentMessage(json: {}))",
            quoted(context_json)
        )
    }

    fn session_declaration(&self, identity: &SessionIdentity) -> String {
        format!(
            r#"enum JupyterKernel {{
    static var communicator = KernelCommunicator(
        jupyterSession: KernelCommunicator.JupyterSession(
            id: {}, key: {}, username: {}))
}}"#,
            quoted(&identity.id),
            quoted(&identity.key),
            quoted(&identity.username)
        )
    }

    fn communicator_include(&self) -> Option<&str> {
        Some("KernelCommunicator.swift")
    }
}
