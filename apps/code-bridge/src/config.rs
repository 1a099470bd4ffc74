use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bridge_guard::{ApiKey, parse_flag};
use thiserror::Error;

pub const API_KEY_VAR: &str = "CODE_BRIDGE_API_KEY";
pub const PROJECT_ROOT_VAR: &str = "CODE_BRIDGE_PROJECT_ROOT";
pub const ALLOW_RUN_VAR: &str = "CODE_BRIDGE_ALLOW_RUN";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8766;
const DEFAULT_RUN_TIMEOUT_SECS: u64 = 120;
const DEFAULT_IO_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("set {0} in the environment")]
    Missing(&'static str),
    #[error("invalid {name}: {message}")]
    Invalid { name: &'static str, message: String },
    #[error("CODE_BRIDGE_PROJECT_ROOT does not exist: {0}")]
    RootMissing(String),
    #[error("CODE_BRIDGE_PROJECT_ROOT is not a directory: {0}")]
    RootNotDirectory(String),
}

/// Everything the bridge needs, read once before the server starts.
#[derive(Debug, Clone)]
pub struct CodeBridgeConfig {
    pub api_key: ApiKey,
    /// Canonical absolute path of the project directory.
    pub project_root: PathBuf,
    pub allow_run: bool,
    pub host: String,
    pub port: u16,
    pub run_timeout: Duration,
    pub io_timeout: Duration,
    pub max_output_bytes: usize,
}

impl CodeBridgeConfig {
    pub fn from_process_env() -> Result<Self, ConfigError> {
        let vars = std::env::vars().collect::<HashMap<_, _>>();
        Self::from_env_map(&vars)
    }

    pub fn from_env_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(vars, name);

        let api_key = get(API_KEY_VAR).ok_or(ConfigError::Missing(API_KEY_VAR))?;
        let root = get(PROJECT_ROOT_VAR).ok_or(ConfigError::Missing(PROJECT_ROOT_VAR))?;

        let mut config = Self::for_root(root, api_key)?;
        config.allow_run = parse_flag(get(ALLOW_RUN_VAR));
        if let Some(host) = get("CODE_BRIDGE_HOST") {
            config.host = host.to_string();
        }
        if let Some(port) = get("PORT") {
            config.port = parse_number("PORT", port)?;
        }
        if let Some(secs) = get("CODE_BRIDGE_RUN_TIMEOUT_SECS") {
            config.run_timeout =
                Duration::from_secs(parse_positive("CODE_BRIDGE_RUN_TIMEOUT_SECS", secs)?);
        }
        if let Some(secs) = get("CODE_BRIDGE_IO_TIMEOUT_SECS") {
            config.io_timeout =
                Duration::from_secs(parse_positive("CODE_BRIDGE_IO_TIMEOUT_SECS", secs)?);
        }
        if let Some(bytes) = get("CODE_BRIDGE_MAX_OUTPUT_BYTES") {
            config.max_output_bytes = parse_positive("CODE_BRIDGE_MAX_OUTPUT_BYTES", bytes)?;
        }
        Ok(config)
    }

    /// Defaults around a root and key; run stays disabled.
    pub fn for_root(root: impl AsRef<Path>, api_key: &str) -> Result<Self, ConfigError> {
        let api_key = ApiKey::new(api_key);
        if !api_key.is_configured() {
            return Err(ConfigError::Missing(API_KEY_VAR));
        }

        Ok(Self {
            api_key,
            project_root: canonical_root(root.as_ref())?,
            allow_run: false,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
            io_timeout: Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        })
    }
}

fn lookup<'a>(vars: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    vars.get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn canonical_root(root: &Path) -> Result<PathBuf, ConfigError> {
    let display = root.display().to_string();
    let canonical =
        std::fs::canonicalize(root).map_err(|_| ConfigError::RootMissing(display.clone()))?;
    if !canonical.is_dir() {
        return Err(ConfigError::RootNotDirectory(display));
    }
    Ok(canonical)
}

fn parse_number<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|error| ConfigError::Invalid {
        name,
        message: error.to_string(),
    })
}

fn parse_positive<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let value = parse_number::<T>(name, raw)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            name,
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn loads_required_settings_and_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_string_lossy().into_owned();
        let config = CodeBridgeConfig::from_env_map(&vars(&[
            (API_KEY_VAR, "secret"),
            (PROJECT_ROOT_VAR, &root),
        ]))
        .expect("config should load");

        assert_eq!(
            config.project_root,
            dir.path().canonicalize().expect("canonical")
        );
        assert!(!config.allow_run);
        assert_eq!(config.port, 8766);
        assert_eq!(config.run_timeout, Duration::from_secs(120));
        assert!(config.api_key.verify("secret"));
    }

    #[test]
    fn reads_optional_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_string_lossy().into_owned();
        let config = CodeBridgeConfig::from_env_map(&vars(&[
            (API_KEY_VAR, "secret"),
            (PROJECT_ROOT_VAR, &root),
            (ALLOW_RUN_VAR, "yes"),
            ("PORT", "9000"),
            ("CODE_BRIDGE_RUN_TIMEOUT_SECS", "5"),
        ]))
        .expect("config should load");

        assert!(config.allow_run);
        assert_eq!(config.port, 9000);
        assert_eq!(config.run_timeout, Duration::from_secs(5));
    }

    #[test]
    fn missing_secret_or_root_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_string_lossy().into_owned();

        let no_key = CodeBridgeConfig::from_env_map(&vars(&[
            (API_KEY_VAR, "  "),
            (PROJECT_ROOT_VAR, &root),
        ]));
        assert!(matches!(no_key, Err(ConfigError::Missing(API_KEY_VAR))));

        let no_root = CodeBridgeConfig::from_env_map(&vars(&[(API_KEY_VAR, "secret")]));
        assert!(matches!(no_root, Err(ConfigError::Missing(PROJECT_ROOT_VAR))));
    }

    #[test]
    fn root_must_exist_and_be_a_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, "x").expect("write");

        assert!(matches!(
            CodeBridgeConfig::for_root(dir.path().join("missing"), "secret"),
            Err(ConfigError::RootMissing(_))
        ));
        assert!(matches!(
            CodeBridgeConfig::for_root(&file, "secret"),
            Err(ConfigError::RootNotDirectory(_))
        ));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_string_lossy().into_owned();
        let result = CodeBridgeConfig::from_env_map(&vars(&[
            (API_KEY_VAR, "secret"),
            (PROJECT_ROOT_VAR, &root),
            ("CODE_BRIDGE_IO_TIMEOUT_SECS", "0"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
