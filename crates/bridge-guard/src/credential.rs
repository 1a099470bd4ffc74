//! Shared-secret check for protected endpoints.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use subtle::ConstantTimeEq;

use crate::error::AccessError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// The configured secret. An empty secret matches nothing.
#[derive(Clone)]
pub struct ApiKey {
    secret: String,
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl ApiKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into().trim().to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.secret.is_empty()
    }

    /// Compares a presented header value, raw or `Bearer`-prefixed, against
    /// the secret.
    pub fn verify(&self, presented: &str) -> bool {
        if !self.is_configured() {
            return false;
        }
        let token = strip_bearer(presented);
        if token.is_empty() {
            return false;
        }
        token.as_bytes().ct_eq(self.secret.as_bytes()).into()
    }

    /// `X-API-Key` and `Authorization` are equivalent; the first one that
    /// matches authorizes the request.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<(), AccessError> {
        let presented = [API_KEY_HEADER, AUTHORIZATION.as_str()]
            .into_iter()
            .filter_map(|name| headers.get(name))
            .filter_map(|value| value.to_str().ok());

        for value in presented {
            if self.verify(value) {
                return Ok(());
            }
        }
        Err(AccessError::Unauthorized)
    }
}

fn strip_bearer(raw: &str) -> &str {
    let trimmed = raw.trim();
    match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => trimmed[7..].trim(),
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn accepts_raw_and_bearer_forms_in_either_header() {
        let key = ApiKey::new("s3cret");

        assert!(key.authorize(&headers(&[("x-api-key", "s3cret")])).is_ok());
        assert!(
            key.authorize(&headers(&[("authorization", "Bearer s3cret")]))
                .is_ok()
        );
        assert!(
            key.authorize(&headers(&[("authorization", "bearer   s3cret ")]))
                .is_ok()
        );
        assert!(key.authorize(&headers(&[("authorization", "s3cret")])).is_ok());
    }

    #[test]
    fn second_header_can_match_when_first_is_wrong() {
        let key = ApiKey::new("s3cret");
        let map = headers(&[("x-api-key", "nope"), ("authorization", "Bearer s3cret")]);
        assert!(key.authorize(&map).is_ok());
    }

    #[test]
    fn rejects_missing_and_mismatched_credentials() {
        let key = ApiKey::new("s3cret");

        assert_eq!(
            key.authorize(&HeaderMap::new()),
            Err(AccessError::Unauthorized)
        );
        assert_eq!(
            key.authorize(&headers(&[("x-api-key", "s3cret2")])),
            Err(AccessError::Unauthorized)
        );
        assert_eq!(
            key.authorize(&headers(&[("authorization", "Bearer ")])),
            Err(AccessError::Unauthorized)
        );
    }

    #[test]
    fn empty_secret_fails_closed() {
        let key = ApiKey::new("   ");

        assert!(!key.is_configured());
        assert!(!key.verify(""));
        assert!(!key.verify("   "));
        assert_eq!(
            key.authorize(&headers(&[("x-api-key", "")])),
            Err(AccessError::Unauthorized)
        );
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let rendered = format!("{:?}", ApiKey::new("s3cret"));
        assert!(!rendered.contains("s3cret"));
    }
}
