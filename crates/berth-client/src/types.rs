// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire types mirrored from the server's JSON responses.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Status of one app as reported by `GET /api/apps/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    /// Version the server's live instance was created for, if any.
    pub running_version: Option<u64>,
    /// Instance status, absent when no instance exists.
    pub instance: Option<InstanceStatus>,
    /// All versions on disk, ascending.
    pub versions: Vec<u64>,
    /// The app's configuration.
    pub config: AppConfig,
}

/// Status of an app's process instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatus {
    /// Environment the instance runs with.
    pub env: HashMap<String, String>,
    /// Whether the process is alive.
    pub running: bool,
    /// Whether the instance was started.
    pub started: bool,
    /// Whether the instance is stopped.
    pub stopped: bool,
}

/// App configuration as stored on the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Environment variables for the supervised process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Free-form keys the server preserves untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Result of a deploy.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployResult {
    /// Whether the deploy completed.
    pub deployed: bool,
    /// The new version number.
    pub version: u64,
}

/// Error body returned by the server.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub error: String,
    #[serde(default)]
    pub code: Option<String>,
}
