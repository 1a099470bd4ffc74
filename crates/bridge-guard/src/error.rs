use axum::http::StatusCode;

/// Every way a guarded request can be refused or fail.
///
/// Confinement variants (`PathEscape`, `NotContained`) stay distinct from
/// `NotFound` so callers and logs can tell "denied" from "absent" even when
/// both end up as client errors on the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("invalid or missing API key")]
    Unauthorized,
    #[error("path escapes the project root: {0}")]
    PathEscape(String),
    #[error("resource is not inside the configured folder: {0}")]
    NotContained(String),
    #[error("{0} is not enabled; this operation is disabled")]
    CapabilityDisabled(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AccessError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn upstream<E: std::fmt::Display>(error: E) -> Self {
        Self::Upstream(error.to_string())
    }

    pub fn internal<E: std::fmt::Display>(error: E) -> Self {
        Self::Internal(error.to_string())
    }

    /// Stable machine-readable code used in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::PathEscape(_) => "path_escape",
            Self::NotContained(_) => "not_contained",
            Self::CapabilityDisabled(_) => "capability_disabled",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "invalid_request",
            Self::Conflict(_) => "conflict",
            Self::Timeout(_) => "timeout",
            Self::Upstream(_) => "upstream_error",
            Self::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::PathEscape(_) | Self::NotContained(_) | Self::CapabilityDisabled(_) => {
                StatusCode::FORBIDDEN
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Confinement and credential failures are caller errors and never worth
    /// retrying.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized
                | Self::PathEscape(_)
                | Self::NotContained(_)
                | Self::CapabilityDisabled(_)
        )
    }
}

pub type AccessResult<T> = Result<T, AccessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confinement_errors_are_forbidden_not_missing() {
        let escape = AccessError::PathEscape("../etc".to_string());
        let outside = AccessError::NotContained("file-1".to_string());
        let missing = AccessError::not_found("a.txt");

        assert_eq!(escape.status(), StatusCode::FORBIDDEN);
        assert_eq!(outside.status(), StatusCode::FORBIDDEN);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_ne!(escape.code(), outside.code());
        assert!(escape.is_denial());
        assert!(!missing.is_denial());
    }

    #[test]
    fn timeouts_and_upstream_map_to_gateway_statuses() {
        assert_eq!(
            AccessError::Timeout("run".to_string()).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AccessError::upstream("drive returned 500").status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
