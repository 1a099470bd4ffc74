//! Response plumbing shared by both bridge services.

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::Response;
use serde_json::{Value, json};

use crate::credential::ApiKey;
use crate::error::AccessError;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Returns the `401` response to send, or `None` when the caller holds the
/// key.
pub fn authorize(key: &ApiKey, headers: &HeaderMap, request_id: &str) -> Option<Response> {
    match key.authorize(headers) {
        Ok(()) => None,
        Err(error) => {
            tracing::warn!(request_id, "rejected request without valid API key");
            Some(error_response(&error, request_id))
        }
    }
}

pub fn parse_json_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, AccessError> {
    serde_json::from_slice(body)
        .map_err(|error| AccessError::bad_request(format!("invalid json body: {error}")))
}

pub fn error_response(error: &AccessError, request_id: &str) -> Response {
    error_response_with_details(error, request_id, None)
}

pub fn error_response_with_details(
    error: &AccessError,
    request_id: &str,
    details: Option<Value>,
) -> Response {
    let mut body = json!({
        "ok": false,
        "error": {
            "requestId": request_id,
            "code": error.code(),
            "message": error.to_string(),
        }
    });
    if let Some(details) = details {
        body["error"]["details"] = details;
    }

    let mut response = json_response(error.status(), request_id, body);
    if matches!(error, AccessError::Unauthorized) {
        let _ = response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Bearer realm=\"bridge\""),
        );
    }
    response
}

pub fn json_response(status: StatusCode, request_id: &str, body: Value) -> Response {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    let _ = headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    insert_request_id(headers, request_id);
    response
}

/// Raw bytes out; valid UTF-8 is labelled as text so clients can display it
/// directly.
pub fn bytes_response(request_id: &str, bytes: Vec<u8>) -> Response {
    let content_type = if std::str::from_utf8(&bytes).is_ok() {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    };
    let mut response = Response::new(Body::from(bytes));
    let headers = response.headers_mut();
    let _ = headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    insert_request_id(headers, request_id);
    response
}

pub fn health_response(request_id: &str) -> Response {
    json_response(StatusCode::OK, request_id, json!({ "status": "ok" }))
}

fn insert_request_id(headers: &mut HeaderMap, request_id: &str) {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        let _ = headers.insert(REQUEST_ID_HEADER, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_echoed_or_generated() {
        let mut headers = HeaderMap::new();
        let generated = request_id_from_headers(&headers);
        assert_eq!(generated.len(), 36);

        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static(" req-1 "));
        assert_eq!(request_id_from_headers(&headers), "req-1");
    }

    #[test]
    fn unauthorized_response_carries_challenge() {
        let response = error_response(&AccessError::Unauthorized, "req-2");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
        assert_eq!(
            response
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|value| value.to_str().ok()),
            Some("req-2")
        );
    }

    #[test]
    fn binary_bodies_are_not_labelled_as_text() {
        let text = bytes_response("r", b"hi".to_vec());
        let binary = bytes_response("r", vec![0xff, 0xfe, 0x00]);
        assert_eq!(
            text.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("text/plain; charset=utf-8"))
        );
        assert_eq!(
            binary.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/octet-stream"))
        );
    }

    #[test]
    fn malformed_json_is_a_bad_request() {
        let parsed: Result<Value, _> = parse_json_body(&Bytes::from_static(b"{nope"));
        assert!(matches!(parsed, Err(AccessError::BadRequest(_))));
    }
}
