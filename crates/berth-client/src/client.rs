// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP client for the berth management server.

use std::collections::HashMap;
use std::path::Path;

use reqwest::{Response, StatusCode};
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::types::{ApiErrorBody, AppConfig, AppStatus, DeployResult};

/// Default server address when `BERTH_SERVER` is unset.
pub const DEFAULT_SERVER: &str = "http://127.0.0.1:3000";

/// Client for one berth server.
pub struct BerthClient {
    base_url: String,
    http: reqwest::Client,
}

impl BerthClient {
    /// Create a client for the given base URL, e.g. `http://host:3000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// Create a client from the `BERTH_SERVER` environment variable, falling
    /// back to [`DEFAULT_SERVER`].
    pub fn from_env() -> Self {
        Self::new(std::env::var("BERTH_SERVER").unwrap_or_else(|_| DEFAULT_SERVER.to_string()))
    }

    /// The base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// List all app names.
    pub async fn apps(&self) -> Result<Vec<String>> {
        let response = self.http.get(self.url("/api/apps")).send().await?;
        parse_json(response).await
    }

    /// Create a new app with the given environment.
    pub async fn create_app(&self, name: &str, env: HashMap<String, String>) -> Result<()> {
        let response = self
            .http
            .put(self.url(&format!("/api/apps/{name}")))
            .json(&json!({"env": env}))
            .send()
            .await?;
        expect_ok(response).await
    }

    /// Fetch the full status of an app.
    pub async fn status(&self, name: &str) -> Result<AppStatus> {
        let response = self
            .http
            .get(self.url(&format!("/api/apps/{name}")))
            .send()
            .await?;
        parse_json(response).await
    }

    /// Start an app.
    pub async fn start(&self, name: &str) -> Result<()> {
        self.post_action(name, "start").await
    }

    /// Stop an app.
    pub async fn stop(&self, name: &str) -> Result<()> {
        self.post_action(name, "stop").await
    }

    /// Restart an app.
    pub async fn restart(&self, name: &str) -> Result<()> {
        self.post_action(name, "restart").await
    }

    /// Switch an app to an existing version.
    pub async fn switch_to(&self, name: &str, version: u64) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/api/apps/{name}/switch-to/{version}")))
            .send()
            .await?;
        expect_ok(response).await
    }

    /// Replace the app's environment. Returns the stored configuration.
    pub async fn set_env(&self, name: &str, env: HashMap<String, String>) -> Result<AppConfig> {
        let response = self
            .http
            .post(self.url(&format!("/api/apps/{name}")))
            .json(&json!({"env": env}))
            .send()
            .await?;
        parse_json(response).await
    }

    /// Deploy a local `.tar.gz` archive as a new version, streaming the file.
    /// Unless `no_switch`, the server switches to the new version.
    pub async fn deploy(
        &self,
        name: &str,
        archive: &Path,
        no_switch: bool,
    ) -> Result<DeployResult> {
        let file = tokio::fs::File::open(archive).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let mut url = self.url(&format!("/api/apps/{name}/deploy"));
        if no_switch {
            url.push_str("?noSwitch=1");
        }
        debug!(app = %name, archive = %archive.display(), "uploading archive");

        let response = self
            .http
            .post(url)
            .header("content-type", "application/x-gzip")
            .body(body)
            .send()
            .await?;
        parse_json(response).await
    }

    async fn post_action(&self, name: &str, action: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/api/apps/{name}/{action}")))
            .send()
            .await?;
        expect_ok(response).await
    }
}

async fn error_from(response: Response) -> ClientError {
    let status = response.status();
    match response.json::<ApiErrorBody>().await {
        Ok(body) => ClientError::Api {
            status: status.as_u16(),
            code: body.code.unwrap_or_else(|| "UNKNOWN".to_string()),
            message: body.error,
        },
        Err(_) => ClientError::UnexpectedResponse(format!("HTTP {status}")),
    }
}

async fn expect_ok(response: Response) -> Result<()> {
    if response.status() == StatusCode::OK || response.status() == StatusCode::CREATED {
        Ok(())
    } else {
        Err(error_from(response).await)
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(error_from(response).await);
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ClientError::UnexpectedResponse(format!("bad JSON body: {e}")))
}
