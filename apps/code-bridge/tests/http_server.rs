use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use code_bridge::config::CodeBridgeConfig;
use code_bridge::http::{CodeBridgeHttpServer, make_code_bridge_http_server};
use code_bridge::service::CodeBridgeService;
use serde_json::Value;

const KEY: &str = "test-key";

fn test_config(root: &Path) -> CodeBridgeConfig {
    let mut config = CodeBridgeConfig::for_root(root, KEY).expect("config should load");
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config
}

async fn spawn_server(config: CodeBridgeConfig) -> CodeBridgeHttpServer {
    make_code_bridge_http_server(Arc::new(CodeBridgeService::new(config)))
        .await
        .expect("test server should start")
}

#[tokio::test]
async fn write_then_read_round_trips_under_the_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = spawn_server(test_config(dir.path())).await;
    let client = reqwest::Client::new();

    let write = client
        .post(format!("{}/write", server.address))
        .header("x-api-key", KEY)
        .json(&serde_json::json!({ "path": "src/a.txt", "content": "hi" }))
        .send()
        .await
        .expect("write call should complete");
    assert_eq!(write.status(), reqwest::StatusCode::OK);
    let write_json: Value = write.json().await.expect("write body should parse");
    assert_eq!(write_json["action"], "created");
    assert_eq!(write_json["path"], "src/a.txt");
    assert!(dir.path().join("src/a.txt").is_file());

    let read = client
        .get(format!("{}/read", server.address))
        .query(&[("path", "src/a.txt")])
        .header("authorization", format!("Bearer {KEY}"))
        .send()
        .await
        .expect("read call should complete");
    assert_eq!(read.status(), reqwest::StatusCode::OK);
    assert_eq!(read.text().await.expect("read body"), "hi");

    let again = client
        .post(format!("{}/write", server.address))
        .header("x-api-key", KEY)
        .json(&serde_json::json!({ "path": "src/a.txt", "content": "hi" }))
        .send()
        .await
        .expect("second write should complete");
    let again_json: Value = again.json().await.expect("write body should parse");
    assert_eq!(again_json["action"], "updated");

    let _ = server.close().await;
}

#[tokio::test]
async fn traversal_is_forbidden() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = spawn_server(test_config(dir.path())).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/read", server.address))
        .query(&[("path", "../../etc/passwd")])
        .header("x-api-key", KEY)
        .send()
        .await
        .expect("read call should complete");

    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let body: Value = response.json().await.expect("json body should parse");
    assert_eq!(body["ok"], Value::Bool(false));
    assert_eq!(body["error"]["code"], "path_escape");
    assert!(
        !body["error"]["message"]
            .as_str()
            .unwrap_or_default()
            .contains(&dir.path().to_string_lossy().into_owned())
    );

    let _ = server.close().await;
}

#[tokio::test]
async fn protected_routes_require_the_key() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = spawn_server(test_config(dir.path())).await;
    let client = reqwest::Client::new();

    let health = client
        .get(format!("{}/health", server.address))
        .send()
        .await
        .expect("health call should complete");
    assert_eq!(health.status(), reqwest::StatusCode::OK);

    for (method, route) in [
        (reqwest::Method::GET, "/list"),
        (reqwest::Method::GET, "/read?path=a.txt"),
        (reqwest::Method::POST, "/write"),
        (reqwest::Method::POST, "/run"),
    ] {
        let response = client
            .request(method, format!("{}{}", server.address, route))
            .header("x-api-key", "wrong-key")
            .body(r#"{"path":"a.txt","content":"x","command":"touch ran.txt"}"#)
            .send()
            .await
            .expect("call should complete");
        assert_eq!(
            response.status(),
            reqwest::StatusCode::UNAUTHORIZED,
            "{route}"
        );
    }
    assert!(!dir.path().join("a.txt").exists());
    assert!(!dir.path().join("ran.txt").exists());

    let _ = server.close().await;
}

#[tokio::test]
async fn lists_an_empty_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = spawn_server(test_config(dir.path())).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/list", server.address))
        .query(&[("path", ".")])
        .header("x-api-key", KEY)
        .send()
        .await
        .expect("list call should complete");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.expect("json body should parse");
    assert_eq!(body["path"], ".");
    assert_eq!(body["entries"], Value::Array(Vec::new()));

    let _ = server.close().await;
}

#[tokio::test]
async fn run_is_disabled_by_default() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = spawn_server(test_config(dir.path())).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/run", server.address))
        .header("x-api-key", KEY)
        .json(&serde_json::json!({ "command": "touch ran.txt" }))
        .send()
        .await
        .expect("run call should complete");

    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let body: Value = response.json().await.expect("json body should parse");
    assert_eq!(body["error"]["code"], "capability_disabled");
    assert!(!dir.path().join("ran.txt").exists());

    let _ = server.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn enabled_run_returns_output_and_exit_code() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(dir.path());
    config.allow_run = true;
    let server = spawn_server(config).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/run", server.address))
        .header("x-api-key", KEY)
        .json(&serde_json::json!({ "command": "echo bridge-ok" }))
        .send()
        .await
        .expect("run call should complete");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.expect("json body should parse");
    assert_eq!(body["stdout"], "bridge-ok\n");
    assert_eq!(body["returncode"], 0);
    assert_eq!(body["timedOut"], false);

    let _ = server.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn slow_command_times_out_with_gateway_timeout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(dir.path());
    config.allow_run = true;
    config.run_timeout = Duration::from_millis(300);
    let server = spawn_server(config).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/run", server.address))
        .header("x-api-key", KEY)
        .json(&serde_json::json!({ "command": "echo partial; sleep 30" }))
        .send()
        .await
        .expect("run call should complete");

    assert_eq!(response.status(), reqwest::StatusCode::GATEWAY_TIMEOUT);
    let body: Value = response.json().await.expect("json body should parse");
    assert_eq!(body["error"]["code"], "timeout");
    assert_eq!(body["error"]["message"], "timed out: command timed out after 300ms");
    assert_eq!(body["error"]["details"]["timedOut"], true);
    assert_eq!(body["error"]["details"]["stdout"], "partial\n");

    let _ = server.close().await;
}
