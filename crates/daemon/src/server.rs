//! The daemon's local HTTP surface.

use crate::driver::PluginDriver;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pogo_core::{Project, ProjectRegistry, VisitError, VisitRequest, VisitResponse};
use pogo_plugin::DataObject;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub struct AppState {
  pub registry: Arc<ProjectRegistry>,
  pub driver: PluginDriver,
}

/// Error body every HTTP failure serializes as: `{"errorString": "..."}`.
#[derive(Debug, Serialize)]
pub struct ApiError {
  #[serde(skip)]
  status: StatusCode,
  #[serde(rename = "errorString")]
  error_string: String,
}

impl ApiError {
  fn new(status: StatusCode, message: impl Into<String>) -> Self {
    Self {
      status,
      error_string: message.into(),
    }
  }

  fn not_found() -> Self {
    Self::new(StatusCode::NOT_FOUND, "The resource was not found.")
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    (self.status, Json(self)).into_response()
  }
}

impl From<VisitError> for ApiError {
  fn from(err: VisitError) -> Self {
    let status = StatusCode::from_u16(err.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Self::new(status, err.to_string())
  }
}

pub fn router(state: Arc<AppState>) -> Router {
  Router::new()
    .route("/", get(home))
    .route("/health", get(health))
    .route("/projects", get(projects))
    .route("/file", post(file))
    .route("/plugin", get(plugin_info).post(plugin_execute))
    .route("/plugins", get(plugins))
    .with_state(state)
}

async fn home() -> &'static str {
  "greetings from pogo daemon"
}

async fn health() -> &'static str {
  "pogo is up and bouncing"
}

async fn projects(State(state): State<Arc<AppState>>) -> Json<Vec<Project>> {
  Json(state.registry.projects().await)
}

async fn file(
  State(state): State<Arc<AppState>>,
  Json(request): Json<VisitRequest>,
) -> Result<Json<VisitResponse>, ApiError> {
  debug!("Visited /file with {:?}", request.path);
  let response = state.registry.visit(request).await?;
  Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct PluginQuery {
  path: String,
}

async fn plugin_info(
  State(state): State<Arc<AppState>>,
  Query(query): Query<PluginQuery>,
) -> Result<Json<pogo_plugin::PluginInfo>, ApiError> {
  match state.driver.info(&query.path).await {
    Some(info) => Ok(Json(info)),
    None => Err(ApiError::not_found()),
  }
}

async fn plugin_execute(
  State(state): State<Arc<AppState>>,
  Json(request): Json<DataObject>,
) -> Result<Json<DataObject>, ApiError> {
  match state.driver.execute(&request.plugin, &request.value).await {
    Some(value) => Ok(Json(DataObject {
      plugin: request.plugin,
      value,
    })),
    None => Err(ApiError::not_found()),
  }
}

async fn plugins(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
  Json(state.driver.plugin_paths())
}
