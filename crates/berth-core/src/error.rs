// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for berth-core.
//!
//! Every variant carries a stable [`error_code`](Error::error_code) string
//! that the API layer embeds in error responses.

use thiserror::Error;

use crate::pipeline::PipelineStage;

/// Result type using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Filesystem operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted JSON (config.json) could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Per-version manifest is missing or malformed.
    #[error("Invalid manifest at {path}: {reason}")]
    Manifest {
        /// Path of the manifest file.
        path: String,
        /// Why the manifest was rejected.
        reason: String,
    },

    /// The instance was never started, so there is no process to operate on.
    #[error("App was not started")]
    NotStarted,

    /// The app has no valid instance (no current version resolves to a
    /// runnable version directory).
    #[error("App does not have a valid instance")]
    NoValidInstance,

    /// The requested version does not exist in the app's version set.
    #[error("Cannot switch to non-existing version {0}")]
    NoSuchVersion(u64),

    /// An app with this name is already registered.
    #[error("App '{0}' already exists")]
    AlreadyExists(String),

    /// The app name is not usable as a directory name.
    #[error("Invalid app name: '{0}'")]
    InvalidAppName(String),

    /// The supervised process failed to come up.
    #[error("Process start failed: {0}")]
    StartFailed(String),

    /// A build command exited non-zero or could not be spawned.
    #[error("Build command '{program}' failed: {reason}")]
    BuildFailed {
        /// Program that was invoked.
        program: String,
        /// Exit code or spawn failure description.
        reason: String,
    },

    /// A deploy pipeline stage failed.
    #[error("Deploy pipeline failed in {stage} stage: {source}")]
    Pipeline {
        /// The stage that failed first.
        stage: PipelineStage,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

impl Error {
    /// Get the stable error code string for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "PARSE_ERROR",
            Self::Manifest { .. } => "MANIFEST_ERROR",
            Self::NotStarted => "NOT_STARTED",
            Self::NoValidInstance => "NO_VALID_INSTANCE",
            Self::NoSuchVersion(_) => "NO_SUCH_VERSION",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::InvalidAppName(_) => "INVALID_APP_NAME",
            Self::StartFailed(_) => "START_FAILED",
            Self::BuildFailed { .. } => "BUILD_FAILED",
            Self::Pipeline { .. } => "PIPELINE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        let cases: Vec<(Error, &str)> = vec![
            (
                Error::Io(std::io::Error::other("disk on fire")),
                "IO_ERROR",
            ),
            (Error::NotStarted, "NOT_STARTED"),
            (Error::NoValidInstance, "NO_VALID_INSTANCE"),
            (Error::NoSuchVersion(7), "NO_SUCH_VERSION"),
            (Error::AlreadyExists("web".to_string()), "ALREADY_EXISTS"),
            (Error::InvalidAppName("../x".to_string()), "INVALID_APP_NAME"),
            (Error::StartFailed("boom".to_string()), "START_FAILED"),
            (
                Error::BuildFailed {
                    program: "cargo".to_string(),
                    reason: "exit code 101".to_string(),
                },
                "BUILD_FAILED",
            ),
            (
                Error::Pipeline {
                    stage: PipelineStage::Decompress,
                    source: std::io::Error::other("corrupt gzip"),
                },
                "PIPELINE_ERROR",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.error_code(), expected, "for {:?}", error);
        }
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            Error::NoSuchVersion(12).to_string(),
            "Cannot switch to non-existing version 12"
        );
        assert_eq!(
            Error::AlreadyExists("api".to_string()).to_string(),
            "App 'api' already exists"
        );
        assert_eq!(Error::NotStarted.to_string(), "App was not started");

        let err = Error::Pipeline {
            stage: PipelineStage::Unpack,
            source: std::io::Error::other("short read"),
        };
        assert_eq!(
            err.to_string(),
            "Deploy pipeline failed in unpack stage: short read"
        );
    }
}
