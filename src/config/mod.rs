use crate::relay::RelayConfig;
use crate::{muted_error, weak_error};
use log::error;
use serde::Deserialize;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AdapterSection {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for AdapterSection {
    fn default() -> Self {
        Self {
            command: "lldb-dap".to_string(),
            args: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TargetSection {
    pub program: Option<PathBuf>,
    pub entry_breakpoint: String,
    pub language: String,
    pub env_blocklist: Vec<String>,
}

impl Default for TargetSection {
    fn default() -> Self {
        Self {
            program: None,
            entry_breakpoint: "repl_main".to_string(),
            language: "swift".to_string(),
            env_blocklist: vec!["REPL_PROGRAM_PATH".to_string(), "DBGK_INSTALL_DIR".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EvaluationSection {
    pub timeout_ms: u64,
}

impl EvaluationSection {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    pub poll_interval_ms: u64,
    pub chunk_size: usize,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            chunk_size: 1000,
        }
    }
}

impl From<&RelaySection> for RelayConfig {
    fn from(section: &RelaySection) -> Self {
        RelayConfig {
            poll_interval: Duration::from_millis(section.poll_interval_ms.max(1)),
            chunk_size: section.chunk_size.max(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PreprocessorSection {
    pub include_roots: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub file: Option<PathBuf>,
}

/// Kernel configuration, missing sections and keys take preset values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KernelConfig {
    #[serde(default)]
    pub adapter: AdapterSection,
    #[serde(default)]
    pub target: TargetSection,
    #[serde(default)]
    pub evaluation: EvaluationSection,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub preprocessor: PreprocessorSection,
    #[serde(default)]
    pub log: LogSection,
}

impl Default for KernelConfig {
    fn default() -> Self {
        let preset = include_str!("preset/kernel.toml");
        toml::de::from_str(preset).expect("should de")
    }
}

impl KernelConfig {
    const DEFAULT_PATH: &'static str = ".config/dbgk/kernel.toml";

    /// Load configuration from file. Return [`None`] on errors.
    ///
    /// Without an explicit path the file is looked up in the user config directory.
    pub fn from_file(path: Option<&Path>) -> Option<Self> {
        let data = match path {
            None => {
                let path = home::home_dir()?;
                let path = path.join(Self::DEFAULT_PATH);
                muted_error!(read_to_string(path))?
            }
            Some(path) => match read_to_string(path) {
                Ok(data) => data,
                Err(err) => {
                    error!(target: "kernel", "Error while load config file {}: {err}", path.display());
                    return None;
                }
            },
        };

        weak_error!(toml::de::from_str(&data))
    }
}
