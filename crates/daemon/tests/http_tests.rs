use pogo_daemon::{router, AppState, PluginDriver, BUILTIN_SEARCH};
use pogo_core::ProjectRegistry;
use pogo_plugin::{DataObject, SearchRequest, SearchResponse};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn serve() -> (TempDir, TempDir, String, Arc<AppState>) {
  let plugin_dir = TempDir::new().unwrap();
  let home = TempDir::new().unwrap();

  let driver = PluginDriver::init(plugin_dir.path());
  let notifier = Arc::new(pogo_daemon::DriverNotifier(driver.clone()));
  let registry = Arc::new(ProjectRegistry::new(home.path().join("projects.json"), notifier));
  let state = Arc::new(AppState { registry, driver });

  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let base = format!("http://{}", listener.local_addr().unwrap());
  let app = router(Arc::clone(&state));
  tokio::spawn(async move {
    axum::serve(listener, app).await.unwrap();
  });
  (plugin_dir, home, base, state)
}

fn a_service(tmp: &TempDir) -> String {
  let dir = tmp.path().join("a-service");
  std::fs::create_dir_all(dir.join("src")).unwrap();
  std::fs::create_dir_all(dir.join(".git")).unwrap();
  std::fs::write(dir.join(".gitignore"), "*.o\n").unwrap();
  std::fs::write(dir.join("README.md"), "# a-service\n\nIt will contain code to query.\n").unwrap();
  std::fs::write(dir.join("src/a.c"), "int main() {\n  // Example query\n  return 0;\n}\n").unwrap();
  format!("{}/", dir.to_string_lossy())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_and_home() {
  let (_p, _h, base, state) = serve().await;
  let client = reqwest::Client::new();

  let health = client.get(format!("{base}/health")).send().await.unwrap();
  assert_eq!(health.status(), 200);
  assert_eq!(health.text().await.unwrap(), "pogo is up and bouncing");

  let home = client.get(format!("{base}/")).send().await.unwrap();
  assert_eq!(home.text().await.unwrap(), "greetings from pogo daemon");

  state.driver.kill();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_file_visit_errors() {
  let (_p, _h, base, state) = serve().await;
  let client = reqwest::Client::new();

  let relative = client
    .post(format!("{base}/file"))
    .json(&serde_json::json!({"path": "_testdata/a-service/"}))
    .send()
    .await
    .unwrap();
  assert_eq!(relative.status(), 400);
  let body: serde_json::Value = relative.json().await.unwrap();
  assert_eq!(body["errorString"], "'path' cannot be relative.");

  let missing = client
    .post(format!("{base}/file"))
    .json(&serde_json::json!({"path": "/definitely/not/here"}))
    .send()
    .await
    .unwrap();
  assert_eq!(missing.status(), 404);

  state.driver.kill();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_plugins_and_plugin_info() {
  let (_p, _h, base, state) = serve().await;
  let client = reqwest::Client::new();

  let plugins: Vec<String> = client
    .get(format!("{base}/plugins"))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  assert_eq!(plugins, vec![BUILTIN_SEARCH.to_string()]);

  let info: serde_json::Value = client
    .get(format!("{base}/plugin"))
    .query(&[("path", BUILTIN_SEARCH)])
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  assert_eq!(info["version"], "0.0.1");

  let unknown = client
    .get(format!("{base}/plugin"))
    .query(&[("path", "/no/such/plugin")])
    .send()
    .await
    .unwrap();
  assert_eq!(unknown.status(), 404);

  state.driver.kill();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_visit_then_files_then_search_end_to_end() {
  let (_p, _h, base, state) = serve().await;
  let client = reqwest::Client::new();
  let fixtures = TempDir::new().unwrap();
  let root = a_service(&fixtures);

  // Adopting the project announces it to the driver, which indexes it in
  // the built-in search plugin.
  let visit: serde_json::Value = client
    .post(format!("{base}/file"))
    .json(&serde_json::json!({"path": format!("{root}README.md")}))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  assert_eq!(visit["project"]["id"], 1);
  assert_eq!(visit["project"]["path"], root);

  let projects: Vec<serde_json::Value> = client
    .get(format!("{base}/projects"))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  assert_eq!(projects.len(), 1);

  let files_request = SearchRequest {
    kind: "files".to_string(),
    project_root: root.clone(),
    duration: String::new(),
    data: String::new(),
  };

  let mut indexed = None;
  for _ in 0..150 {
    tokio::time::sleep(Duration::from_millis(100)).await;
    let response = plugin_round_trip(&client, &base, &files_request).await;
    if response.error.is_empty() && !response.index.paths.is_empty() {
      indexed = Some(response);
      break;
    }
  }
  let files = indexed.expect("project never indexed through the plugin");
  assert!(files.index.paths.iter().any(|p| p == "src/a.c"));

  let search_request = SearchRequest {
    kind: "search".to_string(),
    project_root: root.clone(),
    duration: "10s".to_string(),
    data: "query".to_string(),
  };
  let mut matched = Vec::new();
  for _ in 0..100 {
    let response = plugin_round_trip(&client, &base, &search_request).await;
    if let Some(files) = response.results.files.filter(|f| !f.is_empty()) {
      matched = files;
      break;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
  }
  assert!(matched.iter().any(|f| f.path == "src/a.c" && f.matches[0].line == 2));

  state.driver.kill();
}

/// POST a SearchRequest through /plugin the way a real client does:
/// JSON → URL-encode → DataObject envelope, and back out.
async fn plugin_round_trip(client: &reqwest::Client, base: &str, request: &SearchRequest) -> SearchResponse {
  let payload = urlencoding::encode(&serde_json::to_string(request).unwrap()).into_owned();
  let envelope: DataObject = client
    .post(format!("{base}/plugin"))
    .json(&DataObject {
      plugin: BUILTIN_SEARCH.to_string(),
      value: payload,
    })
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  let decoded = urlencoding::decode(&envelope.value).unwrap().into_owned();
  serde_json::from_str(&decoded).unwrap_or_default()
}
