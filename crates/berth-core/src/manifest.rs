// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-version manifest.
//!
//! Every version directory carries a `manifest.json` describing how to run
//! the application and, optionally, how to prepare a freshly deployed
//! version (dependency rebuild and migration passes).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Error, Result};

/// File name of the per-version manifest.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Manifest of one application version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Program to execute to start the application.
    pub command: String,

    /// Arguments passed to the start command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides applied on top of the app's configured env.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Argv lists run after extraction to rebuild dependencies.
    #[serde(default)]
    pub build: Vec<Vec<String>>,

    /// Argv lists run after the build passes to migrate data.
    #[serde(default)]
    pub migrate: Vec<Vec<String>>,
}

impl Manifest {
    /// Load and validate the manifest of a version directory.
    ///
    /// A missing or malformed file is a [`Error::Manifest`]; other I/O
    /// failures propagate as [`Error::Io`].
    pub async fn load(version_path: &Path) -> Result<Self> {
        let path = version_path.join(MANIFEST_FILE);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Manifest {
                    path: path.display().to_string(),
                    reason: "file not found".to_string(),
                });
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let manifest: Manifest =
            serde_json::from_slice(&bytes).map_err(|e| Error::Manifest {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        if manifest.command.is_empty() {
            return Err(Error::Manifest {
                path: path.display().to_string(),
                reason: "'command' must not be empty".to_string(),
            });
        }

        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_minimal_manifest() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), r#"{"command": "sh"}"#).unwrap();

        let manifest = Manifest::load(dir.path()).await.unwrap();
        assert_eq!(manifest.command, "sh");
        assert!(manifest.args.is_empty());
        assert!(manifest.env.is_empty());
        assert!(manifest.build.is_empty());
        assert!(manifest.migrate.is_empty());
    }

    #[tokio::test]
    async fn load_full_manifest() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{
                "command": "sh",
                "args": ["-c", "exec ./serve"],
                "env": {"RUST_LOG": "info"},
                "build": [["cargo", "build", "--release"]],
                "migrate": [["./migrate.sh", "up"]]
            }"#,
        )
        .unwrap();

        let manifest = Manifest::load(dir.path()).await.unwrap();
        assert_eq!(manifest.args, vec!["-c", "exec ./serve"]);
        assert_eq!(manifest.env.get("RUST_LOG").unwrap(), "info");
        assert_eq!(manifest.build, vec![vec!["cargo", "build", "--release"]]);
        assert_eq!(manifest.migrate, vec![vec!["./migrate.sh", "up"]]);
    }

    #[tokio::test]
    async fn missing_manifest_is_a_manifest_error() {
        let dir = TempDir::new().unwrap();
        let err = Manifest::load(dir.path()).await.unwrap_err();
        assert_eq!(err.error_code(), "MANIFEST_ERROR");
    }

    #[tokio::test]
    async fn malformed_manifest_is_a_manifest_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "{not json").unwrap();

        let err = Manifest::load(dir.path()).await.unwrap_err();
        assert_eq!(err.error_code(), "MANIFEST_ERROR");
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), r#"{"command": ""}"#).unwrap();

        let err = Manifest::load(dir.path()).await.unwrap_err();
        assert_eq!(err.error_code(), "MANIFEST_ERROR");
    }
}
