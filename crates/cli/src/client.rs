//! HTTP client for pogod, with daemon auto-start.

use anyhow::{bail, Context, Result};
use pogo_core::{Project, VisitResponse};
use pogo_plugin::{DataObject, SearchRequest, SearchResponse};
use std::time::{Duration, Instant};

/// Time budget for the daemon to come up after an auto-start.
const STARTUP_BUDGET: Duration = Duration::from_secs(2);
const STARTUP_POLL: Duration = Duration::from_millis(500);

pub struct PogoClient {
  http: reqwest::Client,
  base: String,
}

impl PogoClient {
  pub fn new() -> Self {
    Self {
      http: reqwest::Client::new(),
      base: format!("http://{}", pogo_core::listen_addr()),
    }
  }

  pub async fn health(&self) -> bool {
    match self.http.get(format!("{}/health", self.base)).send().await {
      Ok(response) => response.status().is_success(),
      Err(_) => false,
    }
  }

  /// Health-probe the daemon and start it if nothing answers, polling
  /// until it responds or the startup budget runs out.
  pub async fn ensure_running(&self) -> Result<()> {
    if self.health().await {
      return Ok(());
    }

    std::process::Command::new("pogod")
      .spawn()
      .context("could not start pogod; is it on PATH?")?;

    let start = Instant::now();
    while start.elapsed() < STARTUP_BUDGET {
      tokio::time::sleep(STARTUP_POLL).await;
      if self.health().await {
        return Ok(());
      }
    }
    bail!("pogod did not come up within {STARTUP_BUDGET:?}")
  }

  pub async fn projects(&self) -> Result<Vec<Project>> {
    self.ensure_running().await?;
    let projects = self
      .http
      .get(format!("{}/projects", self.base))
      .send()
      .await?
      .json()
      .await?;
    Ok(projects)
  }

  pub async fn visit(&self, path: &str) -> Result<VisitResponse> {
    self.ensure_running().await?;
    let response = self
      .http
      .post(format!("{}/file", self.base))
      .json(&serde_json::json!({ "path": path }))
      .send()
      .await?;

    if !response.status().is_success() {
      let body: serde_json::Value = response.json().await.unwrap_or_default();
      bail!(
        "{}",
        body["errorString"].as_str().unwrap_or("visit failed").to_string()
      );
    }
    Ok(response.json().await?)
  }

  pub async fn plugins(&self) -> Result<Vec<String>> {
    self.ensure_running().await?;
    let plugins = self
      .http
      .get(format!("{}/plugins", self.base))
      .send()
      .await?
      .json()
      .await?;
    Ok(plugins)
  }

  async fn search_plugin(&self) -> Result<String> {
    let plugins = self.plugins().await?;
    plugins
      .into_iter()
      .find(|p| p.contains("pogo-plugin-search"))
      .context("search plugin not found")
  }

  /// Search the project containing `dir`, visiting it first so an
  /// unadopted project gets indexed on the way.
  pub async fn search(&self, query: &str, dir: &str) -> Result<SearchResponse> {
    let visited = self.visit(dir).await?;
    let plugin = self.search_plugin().await?;

    let request = SearchRequest {
      kind: "search".to_string(),
      project_root: visited.project.path,
      duration: "10s".to_string(),
      data: query.to_string(),
    };
    let payload = urlencoding::encode(&serde_json::to_string(&request)?).into_owned();

    let envelope: DataObject = self
      .http
      .post(format!("{}/plugin", self.base))
      .json(&DataObject { plugin, value: payload })
      .send()
      .await?
      .json()
      .await?;

    let decoded = urlencoding::decode(&envelope.value)?.into_owned();
    let response: SearchResponse =
      serde_json::from_str(&decoded).with_context(|| format!("unexpected plugin response: {decoded}"))?;
    if !response.error.is_empty() {
      bail!("{}", response.error);
    }
    Ok(response)
  }
}

impl Default for PogoClient {
  fn default() -> Self {
    Self::new()
  }
}
