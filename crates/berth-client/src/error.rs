// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for berth-client.

use thiserror::Error;

/// Result type using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to a berth server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error body.
    #[error("server error [{code}]: {message}")]
    Api {
        /// HTTP status of the response.
        status: u16,
        /// Stable error code from the server.
        code: String,
        /// Human-readable message from the server.
        message: String,
    },

    /// The server answered with something we could not interpret.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Local file access failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
