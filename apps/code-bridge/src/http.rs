use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use bridge_guard::AccessError;
use bridge_guard::http::{
    authorize, bytes_response, error_response, error_response_with_details, health_response,
    json_response, parse_json_body, request_id_from_headers,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use crate::service::CodeBridgeService;

#[derive(Clone)]
struct AppState {
    service: Arc<CodeBridgeService>,
}

pub struct CodeBridgeHttpServer {
    pub address: String,
    shutdown: Option<oneshot::Sender<()>>,
    join: tokio::task::JoinHandle<()>,
}

impl CodeBridgeHttpServer {
    pub async fn close(mut self) -> Result<(), String> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.join
            .await
            .map_err(|error| format!("server join failed: {error}"))
    }
}

pub async fn make_code_bridge_http_server(
    service: Arc<CodeBridgeService>,
) -> Result<CodeBridgeHttpServer, String> {
    let bind_host = service
        .config()
        .host
        .parse::<std::net::IpAddr>()
        .map_err(|error| format!("invalid bind host: {error}"))?;
    let listener = TcpListener::bind((bind_host, service.config().port))
        .await
        .map_err(|error| format!("failed to bind listener: {error}"))?;

    let address = format!(
        "http://{}",
        listener.local_addr().map_err(|error| error.to_string())?
    );
    let app = build_router(service);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let join = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    Ok(CodeBridgeHttpServer {
        address,
        shutdown: Some(shutdown_tx),
        join,
    })
}

pub fn build_router(service: Arc<CodeBridgeService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/list", get(list))
        .route("/read", get(read))
        .route("/write", post(write))
        .route("/run", post(run))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}

async fn health(headers: HeaderMap) -> Response {
    health_response(&request_id_from_headers(&headers))
}

#[derive(Debug, Deserialize)]
struct PathQuery {
    path: Option<String>,
}

async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PathQuery>,
) -> Response {
    let request_id = request_id_from_headers(&headers);
    if let Some(response) = authorize(state.service.api_key(), &headers, &request_id) {
        return response;
    }

    match state.service.list(query.path.as_deref()).await {
        Ok(listing) => json_response(StatusCode::OK, &request_id, json!(listing)),
        Err(error) => failure(&error, &request_id),
    }
}

async fn read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PathQuery>,
) -> Response {
    let request_id = request_id_from_headers(&headers);
    if let Some(response) = authorize(state.service.api_key(), &headers, &request_id) {
        return response;
    }

    let Some(path) = query.path.filter(|path| !path.trim().is_empty()) else {
        return failure(
            &AccessError::bad_request("query parameter 'path' is required"),
            &request_id,
        );
    };
    match state.service.read(&path).await {
        Ok(bytes) => bytes_response(&request_id, bytes),
        Err(error) => failure(&error, &request_id),
    }
}

#[derive(Debug, Deserialize)]
struct WriteBody {
    path: String,
    content: String,
}

async fn write(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = request_id_from_headers(&headers);
    if let Some(response) = authorize(state.service.api_key(), &headers, &request_id) {
        return response;
    }

    let parsed: WriteBody = match parse_json_body(&body) {
        Ok(value) => value,
        Err(error) => return failure(&error, &request_id),
    };
    match state.service.write(&parsed.path, &parsed.content).await {
        Ok(outcome) => json_response(StatusCode::OK, &request_id, json!(outcome)),
        Err(error) => failure(&error, &request_id),
    }
}

#[derive(Debug, Deserialize)]
struct RunBody {
    command: String,
    #[serde(default)]
    cwd: Option<String>,
}

async fn run(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = request_id_from_headers(&headers);
    if let Some(response) = authorize(state.service.api_key(), &headers, &request_id) {
        return response;
    }
    // Checked before the body is even parsed.
    if let Err(error) = state.service.run_gate().check() {
        return failure(&error, &request_id);
    }

    let parsed: RunBody = match parse_json_body(&body) {
        Ok(value) => value,
        Err(error) => return failure(&error, &request_id),
    };
    match state.service.run(&parsed.command, parsed.cwd.as_deref()).await {
        Ok(outcome) if outcome.timed_out => {
            let error = AccessError::Timeout(format!(
                "command timed out after {}ms",
                state.service.run_timeout().as_millis()
            ));
            tracing::warn!(request_id = %request_id, "command timed out");
            error_response_with_details(&error, &request_id, Some(json!(outcome)))
        }
        Ok(outcome) => json_response(StatusCode::OK, &request_id, json!(outcome)),
        Err(error) => failure(&error, &request_id),
    }
}

fn failure(error: &AccessError, request_id: &str) -> Response {
    if error.is_denial() {
        tracing::warn!(request_id, code = error.code(), "request denied");
    } else {
        tracing::debug!(request_id, code = error.code(), %error, "request failed");
    }
    error_response(error, request_id)
}
