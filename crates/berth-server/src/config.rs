// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for berth-server.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API listens on.
    pub listen_addr: SocketAddr,
    /// Directory holding all managed apps.
    pub apps_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port: u16 = std::env::var("BERTH_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let listen_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let apps_path =
            PathBuf::from(std::env::var("BERTH_APPS_PATH").unwrap_or_else(|_| "/var/apps".to_string()));

        Ok(Self {
            listen_addr,
            apps_path,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment-variable driven behavior is covered indirectly; mutating
    // process env in parallel tests races, so only defaults are pinned here.
    #[test]
    fn defaults() {
        let config = Config::from_env().unwrap();
        assert_eq!(config.listen_addr.port(), 3000);
        assert_eq!(config.apps_path, PathBuf::from("/var/apps"));
    }
}
