// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

/// Errors raised by the message-processing core.
///
/// Per-message kinds (`Authentication`, `NotAddressed`, `UnknownAgent`,
/// `Timeout`, `Malformed`) are dropped by the runner after logging.
/// `Configuration` and `DirectoryNotFound` are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("received an invalid signature in message")]
    Authentication,

    #[error("received message is not targeted at this node")]
    NotAddressed,

    #[error("no such agent: {0}")]
    UnknownAgent(String),

    #[error("agent {agent} did not complete within {secs:.3}s")]
    Timeout { agent: String, secs: f64 },

    #[error("cannot find agents directory: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("no plugin registered as {0}")]
    NotFound(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("invalid agent manifest {}: {message}", .path.display())]
    Manifest { path: PathBuf, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Stable machine-readable code, used as a structured log field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION",
            Self::Authentication => "AUTHENTICATION",
            Self::NotAddressed => "NOT_ADDRESSED",
            Self::UnknownAgent(_) => "UNKNOWN_AGENT",
            Self::Timeout { .. } => "TIMEOUT",
            Self::DirectoryNotFound(_) => "DIRECTORY_NOT_FOUND",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Malformed(_) => "MALFORMED",
            Self::Manifest { .. } => "MANIFEST",
            Self::Transport(_) => "TRANSPORT",
        }
    }

    /// Whether this error only affects the message being processed.
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            Self::Authentication
                | Self::NotAddressed
                | Self::UnknownAgent(_)
                | Self::Timeout { .. }
                | Self::Malformed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
