// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! A managed application and its versioned on-disk layout.
//!
//! Each app owns one directory under the apps root:
//!
//! ```text
//! <apps root>/<name>/
//!     config.json       app configuration (env vars and free-form extras)
//!     1/                version directories, numeric names
//!     2/
//!     current -> 2      symlink selecting the active version
//!     app.log           stdout of the supervised process
//!     app.error.log     stderr of the supervised process
//! ```
//!
//! The `current` symlink is the single source of truth for which version is
//! active. At most one instance (one OS process) exists per app, always bound
//! to the version `current` pointed at when the instance was created.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::instance::{AppInstance, InstanceSpec, InstanceStatus};
use crate::manifest::Manifest;
use crate::pipeline;

/// File name of the per-app configuration.
pub const CONFIG_FILE: &str = "config.json";
/// Name of the symlink selecting the active version.
pub const CURRENT_LINK: &str = "current";
/// Stdout log file name, kept in the app root across switches.
pub const LOG_OUT: &str = "app.log";
/// Stderr log file name, kept in the app root across switches.
pub const LOG_ERR: &str = "app.error.log";

/// Per-app configuration persisted as `config.json`.
///
/// Unknown top-level keys round-trip untouched so operators can keep their
/// own metadata next to ours.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Environment variables applied to the supervised process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Free-form keys we preserve but do not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Point-in-time status of an app.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    /// Version the instance was created for; absent when no instance
    /// exists, even if a `current` symlink is present on disk.
    pub running_version: Option<u64>,
    /// Status of the instance, if one exists.
    pub instance: Option<InstanceStatus>,
    /// All versions present on disk, ascending.
    pub versions: Vec<u64>,
    /// The app's configuration.
    pub config: AppConfig,
}

/// The instance and the version it was created for. The two are set and
/// cleared together.
#[derive(Debug)]
struct ActiveInstance {
    instance: AppInstance,
    version: u64,
}

#[derive(Debug, Default)]
struct RuntimeState {
    active: Option<ActiveInstance>,
}

/// A managed application.
#[derive(Debug)]
pub struct App {
    name: String,
    root: PathBuf,
    config_path: PathBuf,
    current_path: PathBuf,
    runtime: Mutex<RuntimeState>,
    // Serializes deploys per app; separate from `runtime` so a long upload
    // does not block start/stop/status.
    deploy_lock: Mutex<()>,
}

impl App {
    /// Bind an app to its directory under `apps_root`. Does not touch the
    /// filesystem.
    pub fn new(name: impl Into<String>, apps_root: &Path) -> Self {
        let name = name.into();
        let root = apps_root.join(&name);
        Self {
            config_path: root.join(CONFIG_FILE),
            current_path: root.join(CURRENT_LINK),
            name,
            root,
            runtime: Mutex::new(RuntimeState::default()),
            deploy_lock: Mutex::new(()),
        }
    }

    /// The app's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The app's directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the app's configuration. A missing `config.json` yields the
    /// default configuration; a malformed one is an error.
    pub async fn config(&self) -> Result<AppConfig> {
        match fs::read(&self.config_path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(AppConfig::default()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Persist the app's configuration.
    pub async fn set_config(&self, config: &AppConfig) -> Result<()> {
        let json = serde_json::to_vec_pretty(config)?;
        fs::write(&self.config_path, json).await?;
        Ok(())
    }

    /// Replace the configured environment wholesale and persist. Returns the
    /// stored configuration. A running instance keeps its old environment
    /// until restarted.
    pub async fn update_env(&self, env: HashMap<String, String>) -> Result<AppConfig> {
        let mut config = self.config().await?;
        config.env = env;
        self.set_config(&config).await?;
        info!(app = %self.name, "configuration updated");
        Ok(config)
    }

    /// All versions present on disk, ascending. Only directories whose names
    /// are positive decimal numbers count.
    pub async fn versions(&self) -> Result<Vec<u64>> {
        let mut versions = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(version) = parse_version(&entry.file_name()) else {
                continue;
            };
            if entry.file_type().await?.is_dir() {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Resolve the `current` symlink to a version number.
    ///
    /// Returns `None` when the link is missing, is not a symlink, dangles,
    /// or points outside the app's own version directories.
    pub async fn current_version(&self) -> Result<Option<u64>> {
        let meta = match fs::symlink_metadata(&self.current_path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        if !meta.file_type().is_symlink() {
            return Ok(None);
        }

        // Canonicalize both sides so a link routed through `..` or an
        // absolute path elsewhere cannot masquerade as a version.
        let (resolved, root) = match futures::try_join!(
            fs::canonicalize(&self.current_path),
            fs::canonicalize(&self.root),
        ) {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(app = %self.name, "current symlink dangles");
                return Ok(None);
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let Ok(relative) = resolved.strip_prefix(&root) else {
            return Ok(None);
        };
        let mut components = relative.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => Ok(parse_version(name)),
            _ => Ok(None),
        }
    }

    /// Load the manifest of a specific version.
    pub async fn version_manifest(&self, version: u64) -> Result<Manifest> {
        Manifest::load(&self.root.join(version.to_string())).await
    }

    /// Create an instance for the current version if one can be built.
    /// Leaves the instance untouched if one already exists.
    pub async fn init(&self) -> Result<()> {
        let mut rt = self.runtime.lock().await;
        self.init_locked(&mut rt).await
    }

    async fn init_locked(&self, rt: &mut RuntimeState) -> Result<()> {
        if rt.active.is_some() {
            return Ok(());
        }
        let Some(version) = self.current_version().await? else {
            debug!(app = %self.name, "no current version, skipping instance");
            return Ok(());
        };

        let config = self.config().await?;
        let mut instance = AppInstance::new(InstanceSpec {
            version_path: self.root.join(version.to_string()),
            log_out: self.root.join(LOG_OUT),
            log_err: self.root.join(LOG_ERR),
            env: config.env,
        });
        instance.init().await?;

        rt.active = Some(ActiveInstance { instance, version });
        Ok(())
    }

    /// Start the app's instance, creating one from the current version
    /// first if needed. Fails with [`Error::NoValidInstance`] when there is
    /// no current version to run.
    pub async fn start(&self) -> Result<()> {
        let mut rt = self.runtime.lock().await;
        self.start_locked(&mut rt).await
    }

    async fn start_locked(&self, rt: &mut RuntimeState) -> Result<()> {
        self.init_locked(rt).await?;
        let Some(active) = rt.active.as_mut() else {
            return Err(Error::NoValidInstance);
        };
        active.instance.start().await
    }

    /// Stop the app's instance. Fails with [`Error::NoValidInstance`] when
    /// no instance exists.
    pub async fn stop(&self) -> Result<()> {
        let mut rt = self.runtime.lock().await;
        let Some(active) = rt.active.as_mut() else {
            return Err(Error::NoValidInstance);
        };
        active.instance.stop().await
    }

    /// Stop then start. The instance is rebuilt from the current version, so
    /// a restart picks up configuration changes.
    pub async fn restart(&self) -> Result<()> {
        let mut rt = self.runtime.lock().await;
        if let Some(active) = rt.active.as_mut() {
            match active.instance.stop().await {
                // an instance that never spawned has nothing to stop
                Ok(()) | Err(Error::NotStarted) => {}
                Err(e) => return Err(e),
            }
        }
        rt.active = None;
        self.start_locked(&mut rt).await
    }

    /// Point-in-time status. Versions and configuration are always read
    /// fresh from disk; the running version is the one the live instance
    /// was created for, not whatever `current` points at on disk.
    pub async fn status(&self) -> Result<AppStatus> {
        let mut rt = self.runtime.lock().await;
        let (versions, config) = futures::try_join!(self.versions(), self.config())?;
        let running_version = rt.active.as_ref().map(|active| active.version);
        let instance = rt.active.as_mut().map(|active| active.instance.status());
        Ok(AppStatus {
            running_version,
            instance,
            versions,
            config,
        })
    }

    /// Switch the app to `version`: stop the running instance, repoint the
    /// `current` symlink, and start a fresh instance for the new version.
    ///
    /// The version is validated before anything is touched; switching to a
    /// version that does not exist changes nothing. A failure to stop the
    /// old instance aborts the switch with the symlink still pointing at the
    /// old version.
    pub async fn switch_to_version(&self, version: u64) -> Result<()> {
        let mut rt = self.runtime.lock().await;

        if !self.versions().await?.contains(&version) {
            return Err(Error::NoSuchVersion(version));
        }

        if let Some(active) = rt.active.as_mut() {
            match active.instance.stop().await {
                Ok(()) | Err(Error::NotStarted) => {}
                Err(e) => return Err(e),
            }
        }

        // A missing link is fine, we are about to replace it anyway.
        match fs::remove_file(&self.current_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
        fs::symlink(version.to_string(), &self.current_path).await?;

        rt.active = None;
        info!(app = %self.name, version, "switched current version");
        self.start_locked(&mut rt).await
    }

    /// Pick the next free version number: one past the highest existing
    /// version (at least `start_from` if given), probing past any stray
    /// entry already occupying the name.
    pub async fn next_version_number(&self, start_from: Option<u64>) -> Result<u64> {
        let mut candidate = match self.versions().await?.last() {
            Some(highest) => highest + 1,
            None => 1,
        };
        if let Some(floor) = start_from {
            candidate = candidate.max(floor);
        }
        while fs::try_exists(self.root.join(candidate.to_string())).await? {
            candidate += 1;
        }
        Ok(candidate)
    }

    /// Deploy a gzipped tarball stream as a new version. Returns the new
    /// version number. Deploys to the same app are serialized; the version
    /// is neither switched to nor started here.
    pub async fn deploy<S>(&self, archive: S) -> Result<u64>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static,
    {
        let _guard = self.deploy_lock.lock().await;

        let version = self.next_version_number(None).await?;
        let target = self.root.join(version.to_string());
        info!(app = %self.name, version, "deploying new version");

        if let Err(e) = pipeline::unpack_gzip_tar(archive, &target).await {
            // Best effort, the version probe skips leftovers either way.
            if let Err(cleanup) = fs::remove_dir_all(&target).await {
                warn!(
                    app = %self.name,
                    version,
                    error = %cleanup,
                    "could not remove partially deployed version"
                );
            }
            return Err(e);
        }

        info!(app = %self.name, version, "deployed");
        Ok(version)
    }

    /// Run the manifest's build and migrate passes for a freshly deployed
    /// version, in order, inside the version directory.
    pub async fn prepare_version(&self, version: u64) -> Result<()> {
        let manifest = self.version_manifest(version).await?;
        for argv in manifest.build.iter().chain(manifest.migrate.iter()) {
            self.run_version_command(version, argv).await?;
        }
        Ok(())
    }

    /// Run one command inside a version directory with the app's configured
    /// environment. A non-zero exit fails the call.
    async fn run_version_command(&self, version: u64, argv: &[String]) -> Result<()> {
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::BuildFailed {
                program: String::new(),
                reason: "empty command".to_string(),
            });
        };

        let config = self.config().await?;
        info!(app = %self.name, version, command = %argv.join(" "), "running version command");

        let status = tokio::process::Command::new(program)
            .args(args)
            .current_dir(self.root.join(version.to_string()))
            .envs(&config.env)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| Error::BuildFailed {
                program: program.clone(),
                reason: e.to_string(),
            })?;

        if !status.success() {
            return Err(Error::BuildFailed {
                program: program.clone(),
                reason: format!("exited with {status}"),
            });
        }
        Ok(())
    }
}

/// Parse a directory entry name as a version number. Only non-empty decimal
/// names count, and version 0 is reserved as invalid.
fn parse_version(name: &std::ffi::OsStr) -> Option<u64> {
    let name = name.to_str()?;
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match name.parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(version) => Some(version),
    }
}
