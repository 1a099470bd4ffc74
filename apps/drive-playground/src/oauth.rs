//! Google OAuth for an installed-app client: refreshing access tokens from an
//! authorized-user token file, and the one-time loopback consent flow that
//! produces that file.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::routing::get;
use bridge_guard::AccessError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use url::Url;

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// A cached token is only handed out while it has at least this long to live.
const EXPIRY_SKEW_SECS: i64 = 60;
const DEFAULT_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("oauth credentials missing: {0}")]
    Missing(String),
    #[error("invalid oauth credentials: {0}")]
    Invalid(String),
    #[error("token endpoint returned {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("token request failed: {0}")]
    Transport(String),
    #[error("authorization not completed: {0}")]
    Authorization(String),
}

impl From<TokenError> for AccessError {
    fn from(error: TokenError) -> Self {
        AccessError::Upstream(error.to_string())
    }
}

/// The token file written by `drive-playground authorize`. Also accepts the
/// JSON that Google's own client libraries write for authorized users.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthorizedUser {
    #[serde(default, alias = "access_token", skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(
        default,
        deserialize_with = "lenient_expiry",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for AuthorizedUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedUser")
            .field("client_id", &self.client_id)
            .field("token_uri", &self.token_uri)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

impl AuthorizedUser {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

/// Unparseable expiries are dropped, which forces a refresh on first use.
fn lenient_expiry<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }))
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - chrono::Duration::seconds(EXPIRY_SKEW_SECS) > now
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_access_token(self, now: DateTime<Utc>) -> AccessToken {
        let lifetime = self
            .expires_in
            .unwrap_or(DEFAULT_LIFETIME_SECS)
            .clamp(0, 24 * 3600);
        AccessToken {
            value: self.access_token,
            expires_at: now + chrono::Duration::seconds(lifetime),
        }
    }
}

/// Hands out bearer tokens for Drive calls, refreshing them as they expire.
pub struct TokenSource {
    user: AuthorizedUser,
    http: reqwest::Client,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenSource {
    pub fn new(user: AuthorizedUser, http: reqwest::Client) -> Self {
        let cached = match (&user.token, user.expiry) {
            (Some(value), Some(expires_at)) => Some(AccessToken {
                value: value.clone(),
                expires_at,
            }),
            _ => None,
        };
        Self {
            user,
            http,
            cached: Mutex::new(cached),
        }
    }

    pub async fn access_token(&self) -> Result<String, TokenError> {
        // Held across the refresh so concurrent callers share one grant.
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh(Utc::now())) {
            return Ok(token.value.clone());
        }

        tracing::debug!(client_id = %self.user.client_id, "refreshing drive access token");
        let response = self
            .http
            .post(&self.user.token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.user.refresh_token.as_str()),
                ("client_id", self.user.client_id.as_str()),
                ("client_secret", self.user.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|error| TokenError::Transport(error.to_string()))?;
        let token = read_token_response(response)
            .await?
            .into_access_token(Utc::now());
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }
}

async fn read_token_response(response: reqwest::Response) -> Result<TokenResponse, TokenError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<TokenResponse>()
            .await
            .map_err(|error| TokenError::Invalid(format!("token response: {error}")));
    }
    let body = response.text().await.unwrap_or_default();
    Err(TokenError::Rejected {
        status: status.as_u16(),
        message: oauth_error_message(&body),
    })
}

fn oauth_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct OAuthErrorBody {
        error: String,
        #[serde(default)]
        error_description: Option<String>,
    }

    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(OAuthErrorBody {
            error,
            error_description: Some(description),
        }) => format!("{error}: {description}"),
        Ok(parsed) => parsed.error,
        Err(_) => body.trim().chars().take(200).collect(),
    }
}

/// The `installed` (or `web`) block of a downloaded OAuth client file.
#[derive(Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

impl ClientSecrets {
    pub fn from_json(raw: &str) -> Result<Self, TokenError> {
        #[derive(Deserialize)]
        struct ClientSecretsFile {
            installed: Option<ClientSecrets>,
            web: Option<ClientSecrets>,
        }

        let file: ClientSecretsFile = serde_json::from_str(raw)
            .map_err(|error| TokenError::Invalid(format!("client secrets: {error}")))?;
        file.installed.or(file.web).ok_or_else(|| {
            TokenError::Invalid("client secrets have no installed or web section".to_string())
        })
    }

    pub fn consent_url(&self, redirect_uri: &str, state: &str) -> Result<Url, TokenError> {
        let mut url = Url::parse(&self.auth_uri)
            .map_err(|error| TokenError::Invalid(format!("auth_uri: {error}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", DRIVE_SCOPE)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state);
        Ok(url)
    }

    pub async fn exchange_code(
        &self,
        http: &reqwest::Client,
        code: &str,
        redirect_uri: &str,
    ) -> Result<AuthorizedUser, TokenError> {
        let response = http
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|error| TokenError::Transport(error.to_string()))?;
        let grant = read_token_response(response).await?;
        let refresh_token = grant.refresh_token.clone().ok_or_else(|| {
            TokenError::Authorization("no refresh token granted; revoke access and retry".into())
        })?;
        let scopes = grant
            .scope
            .as_deref()
            .map(|scope| scope.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| vec![DRIVE_SCOPE.to_string()]);
        let token = grant.into_access_token(Utc::now());

        Ok(AuthorizedUser {
            token: Some(token.value),
            refresh_token,
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            token_uri: self.token_uri.clone(),
            expiry: Some(token.expires_at),
            scopes,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

type CallbackSlot = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

/// A loopback listener that receives exactly one OAuth redirect.
pub struct LoopbackRedirect {
    listener: TcpListener,
    redirect_uri: String,
}

impl LoopbackRedirect {
    pub async fn bind() -> Result<Self, TokenError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|error| TokenError::Authorization(format!("failed to bind listener: {error}")))?;
        let address = listener
            .local_addr()
            .map_err(|error| TokenError::Authorization(error.to_string()))?;
        Ok(Self {
            listener,
            redirect_uri: format!("http://{address}/"),
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Serves until the first redirect arrives and returns its code.
    pub async fn wait_for_code(self, expected_state: &str) -> Result<String, TokenError> {
        let Self { listener, .. } = self;
        let (params_tx, params_rx) = oneshot::channel::<CallbackParams>();
        let slot: CallbackSlot = Arc::new(Mutex::new(Some(params_tx)));
        let app = Router::new()
            .route("/", get(receive_callback))
            .with_state(slot);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        let received = params_rx.await;
        let _ = shutdown_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(2), server).await;

        let params = received
            .map_err(|_| TokenError::Authorization("redirect listener stopped".to_string()))?;
        if let Some(error) = params.error {
            return Err(TokenError::Authorization(error));
        }
        if params.state.as_deref() != Some(expected_state) {
            return Err(TokenError::Authorization("state mismatch".to_string()));
        }
        params
            .code
            .filter(|code| !code.is_empty())
            .ok_or_else(|| TokenError::Authorization("redirect carried no code".to_string()))
    }
}

async fn receive_callback(
    State(slot): State<CallbackSlot>,
    Query(params): Query<CallbackParams>,
) -> &'static str {
    if let Some(sender) = slot.lock().await.take() {
        let _ = sender.send(params);
    }
    "Authorization received. You can close this window."
}
