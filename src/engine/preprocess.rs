//! Cell source rewriting: `%include` splicing and inline pragmas.

use crate::dialect::Dialect;
use crate::iopub::{IoPub, Notification};
use crate::weak_error;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static INCLUDE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*%include (.*)$").expect("must compile"));
static INCLUDE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*"([^"]+)"\s*"#).expect("must compile"));
static ENABLE_COMPLETION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*%enableCompletion\s*$").expect("must compile"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreprocessError {
    #[error("Line {line}: %include must be followed by a name in quotes")]
    IncludeSyntax { line: usize },
    #[error("Line {line}: Could not find \"{name}\". Searched {roots:?}.")]
    IncludeNotFound {
        line: usize,
        name: String,
        roots: Vec<PathBuf>,
    },
}

/// Code completion toggle, switched on by the `%enableCompletion` pragma.
#[derive(Debug, Default)]
pub struct CompletionSwitch {
    enabled: AtomicBool,
    supported: bool,
}

impl CompletionSwitch {
    pub fn new(supported: bool) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            supported,
        }
    }

    /// Enable completion if it is supported. Return `true` if completion is enabled.
    pub fn enable(&self) -> bool {
        if self.supported {
            self.enabled.store(true, Ordering::SeqCst);
        }
        self.supported
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

pub struct Preprocessor {
    extra_roots: Vec<PathBuf>,
    completion: Arc<CompletionSwitch>,
    iopub: Arc<dyn IoPub>,
    dialect: Arc<dyn Dialect>,
}

impl Preprocessor {
    pub fn new(
        extra_roots: Vec<PathBuf>,
        completion: Arc<CompletionSwitch>,
        iopub: Arc<dyn IoPub>,
        dialect: Arc<dyn Dialect>,
    ) -> Self {
        Self {
            extra_roots,
            completion,
            iopub,
            dialect,
        }
    }

    /// Directories searched for `%include` files, in priority order: directory of the running
    /// executable, current working directory, configured roots.
    pub fn include_roots(&self) -> Vec<PathBuf> {
        let exe_dir = std::env::current_exe()
            .and_then(fs::canonicalize)
            .ok()
            .and_then(|exe| exe.parent().map(ToOwned::to_owned));
        let cwd = std::env::current_dir().and_then(fs::canonicalize).ok();

        exe_dir
            .into_iter()
            .chain(cwd)
            .chain(self.extra_roots.iter().cloned())
            .collect()
    }

    /// Rewrite cell source. Lines without directives are kept as is.
    ///
    /// # Arguments
    ///
    /// * `source`: cell source
    /// * `cell_file`: synthetic file name of the cell, used in location markers
    pub fn preprocess(&self, source: &str, cell_file: &str) -> Result<String, PreprocessError> {
        let lines = source
            .split('\n')
            .enumerate()
            .map(|(idx, line)| self.preprocess_line(idx + 1, line, cell_file))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines.join("\n"))
    }

    fn preprocess_line(
        &self,
        line_number: usize,
        line: &str,
        cell_file: &str,
    ) -> Result<String, PreprocessError> {
        if let Some(captures) = INCLUDE_RE.captures(line) {
            let rest = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            return self.read_include(line_number, rest, cell_file);
        }

        if ENABLE_COMPLETION_RE.is_match(line) {
            self.handle_enable_completion();
            return Ok(String::new());
        }

        Ok(line.to_string())
    }

    fn read_include(
        &self,
        line_number: usize,
        rest_of_line: &str,
        cell_file: &str,
    ) -> Result<String, PreprocessError> {
        let name = INCLUDE_NAME_RE
            .captures(rest_of_line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .ok_or(PreprocessError::IncludeSyntax { line: line_number })?;

        let roots = self.include_roots();
        let code = roots.iter().find_map(|root| {
            let path = root.join(name);
            match fs::read_to_string(&path) {
                Ok(code) => {
                    debug!(target: "kernel", "include {} resolved to {}", name, path.display());
                    Some(code)
                }
                Err(_) => None,
            }
        });

        let Some(code) = code else {
            return Err(PreprocessError::IncludeNotFound {
                line: line_number,
                name: name.to_string(),
                roots,
            });
        };

        Ok([
            self.dialect.source_location(name, 1),
            code,
            self.dialect.source_location(cell_file, line_number),
            String::new(),
        ]
        .join("\n"))
    }

    fn handle_enable_completion(&self) {
        let text = if self.completion.enable() {
            "Completion enabled!\n"
        } else {
            "Completion NOT enabled because the debug adapter does not support completion.\n"
        };
        weak_error!(
            self.iopub.publish(Notification::stdout(text)),
            "publish completion notice:"
        );
    }
}
