#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodeforgeError {
    /// Rejected before any task record exists.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A collaborator (agents, repository, sandbox) failed inside a workflow step.
    #[error("{step} failed: {message}")]
    Collaborator { step: &'static str, message: String },

    #[error("too many concurrent tasks (limit {0})")]
    AtCapacity(usize),

    #[error("no repository configured for target service '{0}'")]
    UnknownTargetService(String),

    #[error("git is required but was not found in PATH")]
    GitNotFound,

    #[error("operation cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid config key '{0}'")]
    InvalidConfigKey(String),

    #[error("invalid config value for '{key}': {msg}")]
    InvalidConfigValue { key: String, msg: String },

    #[error("io error at {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl CodeforgeError {
    pub fn collaborator(step: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Collaborator {
            step,
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
