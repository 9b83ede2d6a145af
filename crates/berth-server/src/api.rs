// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API over the app manager.
//!
//! All routes live under `/api/apps`. Errors map to
//! `{"error": message, "code": CODE}` bodies; the code strings come from
//! [`berth_core::Error::error_code`].

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Json;
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use berth_core::app::App;
use berth_core::{AppConfig, AppManager, Error};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    /// The app registry.
    pub manager: Arc<AppManager>,
}

/// Build the API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/apps", get(list_apps))
        .route("/api/apps/{name}", put(create_app).get(app_status).post(update_config))
        .route("/api/apps/{name}/start", post(start_app))
        .route("/api/apps/{name}/stop", post(stop_app))
        .route("/api/apps/{name}/restart", post(restart_app))
        .route("/api/apps/{name}/switch-to/{version}", post(switch_app))
        .route("/api/apps/{name}/deploy", post(deploy_app))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error type bridging core errors to HTTP responses.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::AlreadyExists(_) => StatusCode::CONFLICT,
            Error::NoSuchVersion(_) => StatusCode::NOT_FOUND,
            Error::NotStarted | Error::NoValidInstance => StatusCode::CONFLICT,
            Error::InvalidAppName(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status == StatusCode::SERVICE_UNAVAILABLE {
            error!(error = %self.0, code = self.0.error_code(), "request failed");
        }
        let body = json!({
            "error": self.0.to_string(),
            "code": self.0.error_code(),
        });
        (status, Json(body)).into_response()
    }
}

/// 404 with the standard error body for unknown app names.
fn unknown_app(name: &str) -> Response {
    let body = json!({
        "error": format!("No such app: '{name}'"),
        "code": "NO_SUCH_APP",
    });
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

async fn require_app(state: &ApiState, name: &str) -> Result<Arc<App>, Response> {
    state.manager.get_app(name).await.ok_or_else(|| unknown_app(name))
}

async fn list_apps(State(state): State<ApiState>) -> Json<Vec<String>> {
    Json(state.manager.app_names().await)
}

#[derive(Debug, Default, Deserialize)]
struct CreateAppBody {
    #[serde(default)]
    env: HashMap<String, String>,
}

async fn create_app(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Option<Json<CreateAppBody>>,
) -> Result<Response, ApiError> {
    let Json(body) = body.unwrap_or_default();
    let config = AppConfig {
        env: body.env,
        ..AppConfig::default()
    };
    state.manager.create_app(&name, &config).await?;
    Ok((StatusCode::CREATED, Json(json!({"created": true}))).into_response())
}

async fn app_status(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let app = match require_app(&state, &name).await {
        Ok(app) => app,
        Err(resp) => return Ok(resp),
    };
    let status = app.status().await?;
    Ok(Json(status).into_response())
}

#[derive(Debug, Deserialize)]
struct UpdateConfigBody {
    env: Option<HashMap<String, String>>,
}

async fn update_config(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(body): Json<UpdateConfigBody>,
) -> Result<Response, ApiError> {
    let app = match require_app(&state, &name).await {
        Ok(app) => app,
        Err(resp) => return Ok(resp),
    };
    let config = match body.env {
        Some(env) => app.update_env(env).await?,
        None => app.config().await?,
    };
    Ok(Json(config).into_response())
}

async fn start_app(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let app = match require_app(&state, &name).await {
        Ok(app) => app,
        Err(resp) => return Ok(resp),
    };
    app.start().await?;
    Ok(Json(json!({"started": true})).into_response())
}

async fn stop_app(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let app = match require_app(&state, &name).await {
        Ok(app) => app,
        Err(resp) => return Ok(resp),
    };
    app.stop().await?;
    Ok(Json(json!({"stopped": true})).into_response())
}

async fn restart_app(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let app = match require_app(&state, &name).await {
        Ok(app) => app,
        Err(resp) => return Ok(resp),
    };
    app.restart().await?;
    Ok(Json(json!({"restarted": true})).into_response())
}

async fn switch_app(
    State(state): State<ApiState>,
    Path((name, version)): Path<(String, u64)>,
) -> Result<Response, ApiError> {
    let app = match require_app(&state, &name).await {
        Ok(app) => app,
        Err(resp) => return Ok(resp),
    };
    app.switch_to_version(version).await?;
    Ok(Json(json!({"switched": true})).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct DeployQuery {
    #[serde(rename = "noSwitch")]
    no_switch: Option<String>,
}

async fn deploy_app(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<DeployQuery>,
    body: Body,
) -> Result<Response, ApiError> {
    let app = match require_app(&state, &name).await {
        Ok(app) => app,
        Err(resp) => return Ok(resp),
    };

    let stream = body.into_data_stream().map_err(io::Error::other);
    let version = app.deploy(Box::pin(stream)).await?;

    app.prepare_version(version).await?;

    let no_switch = query.no_switch.as_deref().is_some_and(|v| v == "1" || v == "true");
    if !no_switch {
        app.switch_to_version(version).await?;
    }

    info!(app = %name, version, switched = !no_switch, "deploy finished");
    Ok(Json(json!({"deployed": true, "version": version})).into_response())
}
