use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use bridge_guard::ApiKey;
use thiserror::Error;

use crate::oauth::{AuthorizedUser, ClientSecrets, TokenError};

pub const API_KEY_VAR: &str = "DRIVE_PLAYGROUND_API_KEY";
pub const FOLDER_ID_VAR: &str = "DRIVE_PLAYGROUND_FOLDER_ID";
pub const FOLDER_PATH_VAR: &str = "DRIVE_PLAYGROUND_FOLDER_PATH";
pub const TOKEN_JSON_VAR: &str = "GOOGLE_DRIVE_TOKEN_JSON";
pub const CREDENTIALS_JSON_VAR: &str = "GOOGLE_DRIVE_CREDENTIALS_JSON";

const DEFAULT_FOLDER_PATH: &str = "Personal/AI Research/OpenClaw Playground";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8765;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const FETCH_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("set {0} in the environment")]
    Missing(&'static str),
    #[error("invalid {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMode {
    Google,
    /// In-process drive, for local trials without Google credentials.
    Mock,
}

/// Where the playground folder comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderSource {
    Id(String),
    /// Folder names walked down from the drive root.
    Path(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct DrivePlaygroundConfig {
    pub api_key: ApiKey,
    pub folder: FolderSource,
    pub mode: DriveMode,
    pub token_json: Option<String>,
    pub token_file: PathBuf,
    pub host: String,
    pub port: u16,
    pub http_timeout: Duration,
    pub fetch_timeout: Duration,
}

impl DrivePlaygroundConfig {
    pub fn from_process_env() -> Result<Self, ConfigError> {
        let vars = std::env::vars().collect::<HashMap<_, _>>();
        Self::from_env_map(&vars)
    }

    pub fn from_env_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(vars, name);

        let api_key = get(API_KEY_VAR).ok_or(ConfigError::Missing(API_KEY_VAR))?;
        let mut config = Self::default_mock(api_key)?;
        config.mode = match get("DRIVE_PLAYGROUND_MODE").map(str::to_ascii_lowercase) {
            None => DriveMode::Google,
            Some(mode) if mode == "google" => DriveMode::Google,
            Some(mode) if mode == "mock" => DriveMode::Mock,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "DRIVE_PLAYGROUND_MODE",
                    message: format!("expected google or mock, got {other}"),
                });
            }
        };

        config.folder = match (get(FOLDER_ID_VAR), get(FOLDER_PATH_VAR)) {
            (Some(id), _) => FolderSource::Id(id.to_string()),
            (None, Some(path)) => FolderSource::Path(split_folder_path(path)),
            (None, None) => FolderSource::Path(split_folder_path(DEFAULT_FOLDER_PATH)),
        };
        if config.folder == FolderSource::Path(Vec::new()) {
            return Err(ConfigError::Invalid {
                name: FOLDER_PATH_VAR,
                message: "names no folder".to_string(),
            });
        }

        config.token_json = get(TOKEN_JSON_VAR).map(str::to_string);
        config.token_file = OAuthFiles::from_env_map(vars).token_file;
        if let Some(host) = get("DRIVE_PLAYGROUND_HOST") {
            config.host = host.to_string();
        }
        if let Some(port) = get("PORT") {
            config.port = port.parse().map_err(|error: std::num::ParseIntError| {
                ConfigError::Invalid {
                    name: "PORT",
                    message: error.to_string(),
                }
            })?;
        }
        if let Some(secs) = get("DRIVE_PLAYGROUND_HTTP_TIMEOUT_SECS") {
            config.http_timeout = Duration::from_secs(parse_timeout(secs)?);
        }
        Ok(config)
    }

    /// Defaults for an in-process drive with the playground at the default path.
    pub fn default_mock(api_key: &str) -> Result<Self, ConfigError> {
        let api_key = ApiKey::new(api_key);
        if !api_key.is_configured() {
            return Err(ConfigError::Missing(API_KEY_VAR));
        }
        Ok(Self {
            api_key,
            folder: FolderSource::Path(split_folder_path(DEFAULT_FOLDER_PATH)),
            mode: DriveMode::Mock,
            token_json: None,
            token_file: PathBuf::from("token.json"),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            fetch_timeout: Duration::from_secs(FETCH_TIMEOUT_SECS),
        })
    }

    /// Token JSON from the environment wins over the token file.
    pub fn load_authorized_user(&self) -> Result<AuthorizedUser, TokenError> {
        if let Some(raw) = &self.token_json {
            return AuthorizedUser::from_json(raw)
                .map_err(|error| TokenError::Invalid(format!("{TOKEN_JSON_VAR}: {error}")));
        }
        match std::fs::read_to_string(&self.token_file) {
            Ok(raw) => AuthorizedUser::from_json(&raw).map_err(|error| {
                TokenError::Invalid(format!("{}: {error}", self.token_file.display()))
            }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(TokenError::Missing(format!(
                    "no {TOKEN_JSON_VAR} and no token file at {}; run `drive-playground authorize` first",
                    self.token_file.display()
                )))
            }
            Err(error) => Err(TokenError::Invalid(format!(
                "{}: {error}",
                self.token_file.display()
            ))),
        }
    }
}

/// Client secrets and token location for the consent flow, which runs
/// without an API key.
#[derive(Debug, Clone)]
pub struct OAuthFiles {
    pub credentials_json: Option<String>,
    pub credentials_file: PathBuf,
    pub token_file: PathBuf,
}

impl OAuthFiles {
    pub fn from_process_env() -> Self {
        let vars = std::env::vars().collect::<HashMap<_, _>>();
        Self::from_env_map(&vars)
    }

    pub fn from_env_map(vars: &HashMap<String, String>) -> Self {
        let get = |name: &str| lookup(vars, name);
        Self {
            credentials_json: get(CREDENTIALS_JSON_VAR).map(str::to_string),
            credentials_file: PathBuf::from(
                get("DRIVE_PLAYGROUND_CREDENTIALS_FILE")
                    .or_else(|| get("GOOGLE_APPLICATION_CREDENTIALS"))
                    .unwrap_or("credentials.json"),
            ),
            token_file: PathBuf::from(get("DRIVE_PLAYGROUND_TOKEN_FILE").unwrap_or("token.json")),
        }
    }

    /// Inline client JSON from the environment wins over the secrets file.
    pub fn load_client_secrets(&self) -> Result<ClientSecrets, TokenError> {
        if let Some(raw) = &self.credentials_json {
            return ClientSecrets::from_json(raw).map_err(|error| {
                TokenError::Invalid(format!(
                    "{CREDENTIALS_JSON_VAR} is set but invalid, paste the whole credentials.json: {error}"
                ))
            });
        }
        match std::fs::read_to_string(&self.credentials_file) {
            Ok(raw) => ClientSecrets::from_json(&raw),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(TokenError::Missing(format!(
                    "no {CREDENTIALS_JSON_VAR} and no OAuth desktop client file at {} \
                     (Google Cloud Console, APIs & Services, Credentials)",
                    self.credentials_file.display()
                )))
            }
            Err(error) => Err(TokenError::Invalid(format!(
                "{}: {error}",
                self.credentials_file.display()
            ))),
        }
    }
}

fn lookup<'a>(vars: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    vars.get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn split_folder_path(raw: &str) -> Vec<String> {
    raw.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_timeout(raw: &str) -> Result<u64, ConfigError> {
    let invalid = |message: String| ConfigError::Invalid {
        name: "DRIVE_PLAYGROUND_HTTP_TIMEOUT_SECS",
        message,
    };
    let secs = raw.parse::<u64>().map_err(|error| invalid(error.to_string()))?;
    if secs == 0 {
        return Err(invalid("must be greater than zero".to_string()));
    }
    Ok(secs)
}
