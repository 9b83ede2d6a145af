// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registry and fleet-wide lifecycle for all managed apps.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::app::{App, AppConfig};
use crate::error::{Error, Result};

/// Owns the apps root directory and the registry of [`App`]s inside it.
///
/// Fan-out operations (start and stop of the whole fleet) isolate failures
/// per app: one broken app never prevents the others from being handled.
pub struct AppManager {
    apps_root: PathBuf,
    apps: RwLock<HashMap<String, Arc<App>>>,
}

impl AppManager {
    /// Create a manager over an apps root directory.
    pub fn new(apps_root: impl Into<PathBuf>) -> Self {
        Self {
            apps_root: apps_root.into(),
            apps: RwLock::new(HashMap::new()),
        }
    }

    /// The apps root directory.
    pub fn apps_root(&self) -> &std::path::Path {
        &self.apps_root
    }

    /// Scan the apps root and rebuild the registry. Every subdirectory is an
    /// app. An unreadable root is fatal; an unreadable entry aborts the scan.
    pub async fn init(&self) -> Result<()> {
        let mut discovered = HashMap::new();
        let mut entries = fs::read_dir(&self.apps_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                warn!(entry = ?entry.file_name(), "skipping non-UTF-8 app directory");
                continue;
            };
            discovered.insert(name.clone(), Arc::new(App::new(name, &self.apps_root)));
        }

        info!(apps = discovered.len(), root = %self.apps_root.display(), "registry loaded");
        *self.apps.write().await = discovered;
        Ok(())
    }

    /// Initialize the registry and start every app that has a current
    /// version. Per-app start failures are logged and swallowed; only the
    /// registry scan itself can fail.
    pub async fn start(&self) -> Result<()> {
        self.init().await?;

        let apps = self.apps.read().await;
        let mut tasks = JoinSet::new();
        for app in apps.values() {
            let app = Arc::clone(app);
            tasks.spawn(async move {
                let result = app.start().await;
                (app, result)
            });
        }
        drop(apps);

        while let Some(joined) = tasks.join_next().await {
            let Ok((app, result)) = joined else { continue };
            match result {
                Ok(()) => info!(app = %app.name(), "app started"),
                // Apps without a deployed version are expected at first boot.
                Err(Error::NoValidInstance) => {
                    info!(app = %app.name(), "app has no current version, not started")
                }
                Err(e) => warn!(app = %app.name(), error = %e, "app failed to start"),
            }
        }
        Ok(())
    }

    /// Stop every registered app. Never fails; per-app stop failures are
    /// logged and swallowed.
    pub async fn stop(&self) {
        let apps = self.apps.read().await;
        let mut tasks = JoinSet::new();
        for app in apps.values() {
            let app = Arc::clone(app);
            tasks.spawn(async move {
                let result = app.stop().await;
                (app, result)
            });
        }
        drop(apps);

        while let Some(joined) = tasks.join_next().await {
            let Ok((app, result)) = joined else { continue };
            match result {
                Ok(()) => info!(app = %app.name(), "app stopped"),
                Err(Error::NotStarted | Error::NoValidInstance) => {}
                Err(e) => warn!(app = %app.name(), error = %e, "app failed to stop"),
            }
        }
    }

    /// Look up an app by name.
    pub async fn get_app(&self, name: &str) -> Option<Arc<App>> {
        self.apps.read().await.get(name).cloned()
    }

    /// Names of all registered apps, sorted.
    pub async fn app_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.apps.read().await.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Create and register a new app with the given configuration. The app
    /// directory and `config.json` are created; no versions exist yet.
    pub async fn create_app(&self, name: &str, config: &AppConfig) -> Result<Arc<App>> {
        validate_app_name(name)?;

        let mut apps = self.apps.write().await;
        if apps.contains_key(name) {
            return Err(Error::AlreadyExists(name.to_string()));
        }

        let app = Arc::new(App::new(name, &self.apps_root));
        match fs::create_dir(app.root()).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyExists(name.to_string()));
            }
            Err(e) => return Err(Error::Io(e)),
        }
        app.set_config(config).await?;

        info!(app = %name, "app created");
        apps.insert(name.to_string(), Arc::clone(&app));
        Ok(app)
    }
}

/// Reject names that cannot be a single safe directory component.
fn validate_app_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\0');
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidAppName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SLEEPER: &str = r#"{"command": "sh", "args": ["-c", "sleep 30"]}"#;

    async fn seed_app(root: &std::path::Path, name: &str, version: Option<u64>) {
        let app_dir = root.join(name);
        fs::create_dir(&app_dir).await.unwrap();
        if let Some(v) = version {
            let version_dir = app_dir.join(v.to_string());
            fs::create_dir(&version_dir).await.unwrap();
            fs::write(version_dir.join(crate::manifest::MANIFEST_FILE), SLEEPER)
                .await
                .unwrap();
            fs::symlink(v.to_string(), app_dir.join(crate::app::CURRENT_LINK))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn init_discovers_directories_only() {
        let root = TempDir::new().unwrap();
        seed_app(root.path(), "web", None).await;
        seed_app(root.path(), "api", None).await;
        fs::write(root.path().join("README"), "not an app").await.unwrap();

        let manager = AppManager::new(root.path());
        manager.init().await.unwrap();

        assert_eq!(manager.app_names().await, vec!["api", "web"]);
        assert!(manager.get_app("web").await.is_some());
        assert!(manager.get_app("README").await.is_none());
    }

    #[tokio::test]
    async fn init_on_missing_root_fails() {
        let root = TempDir::new().unwrap();
        let manager = AppManager::new(root.path().join("nope"));
        assert!(manager.init().await.is_err());
    }

    #[tokio::test]
    async fn start_isolates_per_app_failures() {
        let root = TempDir::new().unwrap();
        seed_app(root.path(), "good", Some(1)).await;
        // no versions, start will report NoValidInstance internally
        seed_app(root.path(), "empty", None).await;
        // current version present but its manifest is garbage
        seed_app(root.path(), "broken", Some(1)).await;
        fs::write(
            root.path().join("broken").join("1").join(crate::manifest::MANIFEST_FILE),
            "{not json",
        )
        .await
        .unwrap();

        let manager = AppManager::new(root.path());
        manager.start().await.unwrap();

        let good = manager.get_app("good").await.unwrap();
        let status = good.status().await.unwrap();
        assert!(status.instance.as_ref().unwrap().running);

        let empty = manager.get_app("empty").await.unwrap();
        let status = empty.status().await.unwrap();
        assert!(status.instance.is_none());

        let broken = manager.get_app("broken").await.unwrap();
        let status = broken.status().await.unwrap();
        assert!(status.instance.is_none());

        manager.stop().await;
        let status = good.status().await.unwrap();
        assert!(!status.instance.as_ref().unwrap().running);
    }

    #[tokio::test]
    async fn create_app_persists_config_and_registers() {
        let root = TempDir::new().unwrap();
        let manager = AppManager::new(root.path());
        manager.init().await.unwrap();

        let mut config = AppConfig::default();
        config.env.insert("PORT".to_string(), "8080".to_string());
        let app = manager.create_app("web", &config).await.unwrap();

        assert!(app.root().is_dir());
        let stored = app.config().await.unwrap();
        assert_eq!(stored.env.get("PORT").unwrap(), "8080");
        assert_eq!(manager.app_names().await, vec!["web"]);
    }

    #[tokio::test]
    async fn create_app_rejects_duplicates() {
        let root = TempDir::new().unwrap();
        seed_app(root.path(), "web", None).await;

        let manager = AppManager::new(root.path());
        manager.init().await.unwrap();

        let err = manager
            .create_app("web", &AppConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "ALREADY_EXISTS");
    }

    #[tokio::test]
    async fn create_app_rejects_bad_names() {
        let root = TempDir::new().unwrap();
        let manager = AppManager::new(root.path());
        manager.init().await.unwrap();

        for name in ["", ".", "..", "a/b"] {
            let err = manager
                .create_app(name, &AppConfig::default())
                .await
                .unwrap_err();
            assert_eq!(err.error_code(), "INVALID_APP_NAME", "for {name:?}");
        }
    }
}
