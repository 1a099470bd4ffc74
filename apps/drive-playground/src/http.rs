use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use bridge_guard::AccessError;
use bridge_guard::http::{
    authorize, bytes_response, error_response, health_response, json_response, parse_json_body,
    request_id_from_headers,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use crate::service::{DrivePlaygroundService, WriteRequest};

#[derive(Clone)]
struct AppState {
    service: Arc<DrivePlaygroundService>,
}

pub struct DrivePlaygroundHttpServer {
    pub address: String,
    shutdown: Option<oneshot::Sender<()>>,
    join: tokio::task::JoinHandle<()>,
}

impl DrivePlaygroundHttpServer {
    pub async fn close(mut self) -> Result<(), String> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.join
            .await
            .map_err(|error| format!("server join failed: {error}"))
    }
}

pub async fn make_drive_playground_http_server(
    service: Arc<DrivePlaygroundService>,
    host: &str,
    port: u16,
) -> Result<DrivePlaygroundHttpServer, String> {
    let bind_host = host
        .parse::<std::net::IpAddr>()
        .map_err(|error| format!("invalid bind host: {error}"))?;
    let listener = TcpListener::bind((bind_host, port))
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

    Ok(DrivePlaygroundHttpServer {
        address,
        shutdown: Some(shutdown_tx),
        join,
    })
}

pub fn build_router(service: Arc<DrivePlaygroundService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/list", get(list))
        .route("/files/{id}/content", get(read))
        .route("/write", post(write))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}

async fn health(headers: HeaderMap) -> Response {
    health_response(&request_id_from_headers(&headers))
}

/// Kept as strings so a malformed value is reported after authentication.
#[derive(Debug, Deserialize)]
struct ListQuery {
    page_token: Option<String>,
    page_size: Option<String>,
}

async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    let request_id = request_id_from_headers(&headers);
    if let Some(response) = authorize(state.service.api_key(), &headers, &request_id) {
        return response;
    }

    let page_size = match query.page_size.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<u32>() {
            Ok(size) => Some(size),
            Err(_) => {
                return failure(
                    &AccessError::bad_request("page_size must be an integer"),
                    &request_id,
                );
            }
        },
    };
    match state
        .service
        .list(query.page_token.as_deref(), page_size)
        .await
    {
        Ok(listing) => json_response(StatusCode::OK, &request_id, json!(listing)),
        Err(error) => failure(&error, &request_id),
    }
}

async fn read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let request_id = request_id_from_headers(&headers);
    if let Some(response) = authorize(state.service.api_key(), &headers, &request_id) {
        return response;
    }

    match state.service.read(&id).await {
        Ok(bytes) => bytes_response(&request_id, bytes),
        Err(error) => failure(&error, &request_id),
    }
}

async fn write(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = request_id_from_headers(&headers);
    if let Some(response) = authorize(state.service.api_key(), &headers, &request_id) {
        return response;
    }

    let parsed: WriteRequest = match parse_json_body(&body) {
        Ok(value) => value,
        Err(error) => return failure(&error, &request_id),
    };
    match state.service.write(parsed).await {
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
