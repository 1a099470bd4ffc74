use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use bridge_guard::{
    AccessError, AccessResult, ApiKey, CapabilityGate, PathGuard, ResourceGuard,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{ALLOW_RUN_VAR, CodeBridgeConfig};
use crate::runner::{CommandRunner, RunOutcome};

const LOGGED_COMMAND_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub path: String,
    pub entries: Vec<ListEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub path: String,
    pub ok: bool,
    pub action: WriteAction,
    pub bytes: usize,
}

/// A confined request path: what the caller asked for, normalized, and the
/// real location after following links.
struct Resolved {
    display: String,
    path: PathBuf,
}

pub struct CodeBridgeService {
    config: CodeBridgeConfig,
    guard: PathGuard,
    run_gate: CapabilityGate,
    runner: CommandRunner,
}

impl CodeBridgeService {
    pub fn new(config: CodeBridgeConfig) -> Self {
        let guard = PathGuard::new(config.project_root.clone());
        let run_gate = CapabilityGate::new(ALLOW_RUN_VAR, config.allow_run);
        let runner = CommandRunner::new(config.run_timeout, config.max_output_bytes);
        Self {
            config,
            guard,
            run_gate,
            runner,
        }
    }

    pub fn config(&self) -> &CodeBridgeConfig {
        &self.config
    }

    pub fn api_key(&self) -> &ApiKey {
        &self.config.api_key
    }

    pub fn run_gate(&self) -> &CapabilityGate {
        &self.run_gate
    }

    pub fn run_timeout(&self) -> Duration {
        self.runner.timeout()
    }

    pub async fn list(&self, path: Option<&str>) -> AccessResult<Listing> {
        let target = self.resolve(path.unwrap_or(".")).await?;
        let shown = target.display.clone();

        let entries = self
            .with_io_timeout("list", async move {
                let metadata = tokio::fs::metadata(&target.path)
                    .await
                    .map_err(|error| io_error(error, &target.display))?;
                if !metadata.is_dir() {
                    return Err(AccessError::bad_request(format!(
                        "not a directory: {}",
                        target.display
                    )));
                }

                let mut reader = tokio::fs::read_dir(&target.path)
                    .await
                    .map_err(|error| io_error(error, &target.display))?;
                let mut entries = Vec::new();
                while let Some(entry) = reader
                    .next_entry()
                    .await
                    .map_err(|error| io_error(error, &target.display))?
                {
                    let metadata = entry
                        .metadata()
                        .await
                        .map_err(|error| io_error(error, &target.display))?;
                    let file_type = metadata.file_type();
                    let kind = if file_type.is_symlink() {
                        EntryKind::Symlink
                    } else if file_type.is_dir() {
                        EntryKind::Dir
                    } else {
                        EntryKind::File
                    };
                    entries.push(ListEntry {
                        name: entry.file_name().to_string_lossy().into_owned(),
                        kind,
                        size: if kind == EntryKind::File {
                            metadata.len()
                        } else {
                            0
                        },
                        modified: metadata
                            .modified()
                            .ok()
                            .map(|time| DateTime::<Utc>::from(time).to_rfc3339()),
                    });
                }
                entries.sort_by(|left, right| left.name.cmp(&right.name));
                Ok(entries)
            })
            .await?;

        debug!(path = %shown, count = entries.len(), "listed directory");
        Ok(Listing {
            path: shown,
            entries,
        })
    }

    pub async fn read(&self, path: &str) -> AccessResult<Vec<u8>> {
        let target = self.resolve(path).await?;
        self.with_io_timeout("read", async move {
            let is_file = tokio::fs::metadata(&target.path)
                .await
                .map(|metadata| metadata.is_file())
                .unwrap_or(false);
            if !is_file {
                return Err(AccessError::not_found(format!(
                    "not a file or not found: {}",
                    target.display
                )));
            }
            tokio::fs::read(&target.path)
                .await
                .map_err(|error| io_error(error, &target.display))
        })
        .await
    }

    /// Replaces the whole file, creating it and its parents when missing.
    pub async fn write(&self, path: &str, content: &str) -> AccessResult<WriteOutcome> {
        let target = self.resolve(path).await?;
        if target.path == self.guard.root() {
            return Err(AccessError::bad_request(
                "cannot write to the project root itself",
            ));
        }

        let bytes = content.len();
        let data = content.as_bytes().to_vec();
        let outcome = self
            .with_io_timeout("write", async move {
                let existed = match tokio::fs::metadata(&target.path).await {
                    Ok(metadata) if metadata.is_dir() => {
                        return Err(AccessError::bad_request(format!(
                            "path is a directory: {}",
                            target.display
                        )));
                    }
                    Ok(_) => true,
                    Err(error) if error.kind() == ErrorKind::NotFound => false,
                    Err(error) => return Err(io_error(error, &target.display)),
                };

                if let Some(parent) = target.path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|error| io_error(error, &target.display))?;
                }
                tokio::fs::write(&target.path, data)
                    .await
                    .map_err(|error| io_error(error, &target.display))?;

                Ok(WriteOutcome {
                    path: target.display,
                    ok: true,
                    action: if existed {
                        WriteAction::Updated
                    } else {
                        WriteAction::Created
                    },
                    bytes,
                })
            })
            .await?;

        info!(path = %outcome.path, action = ?outcome.action, bytes, "wrote file");
        Ok(outcome)
    }

    /// Runs a shell command under the project root. Refused outright unless
    /// the run capability is enabled.
    pub async fn run(&self, command: &str, cwd: Option<&str>) -> AccessResult<RunOutcome> {
        self.run_gate.check()?;
        if command.trim().is_empty() {
            return Err(AccessError::bad_request("command must not be empty"));
        }

        let cwd = cwd.map(str::trim).filter(|value| !value.is_empty());
        let (dir, shown_cwd) = match cwd {
            None => (self.guard.root().to_path_buf(), ".".to_string()),
            Some(raw) => {
                let target = self.resolve(raw).await?;
                let is_dir = self
                    .with_io_timeout("cwd check", async {
                        Ok(tokio::fs::metadata(&target.path)
                            .await
                            .map(|metadata| metadata.is_dir())
                            .unwrap_or(false))
                    })
                    .await?;
                if !is_dir {
                    return Err(AccessError::bad_request(format!(
                        "cwd is not a directory: {}",
                        target.display
                    )));
                }
                (target.path, target.display)
            }
        };

        info!(
            command = %truncate_chars(command, LOGGED_COMMAND_CHARS),
            cwd = %shown_cwd,
            "running command"
        );
        let outcome = self.runner.run(command, &dir).await?;
        info!(
            exit_code = ?outcome.exit_code,
            timed_out = outcome.timed_out,
            duration_ms = outcome.duration_ms,
            "command finished"
        );
        Ok(outcome)
    }

    async fn resolve(&self, raw: &str) -> AccessResult<Resolved> {
        let confined = self.guard.confine(raw)?;
        let display = self.guard.relative(&confined);
        let guard = self.guard.clone();
        let path = self
            .with_io_timeout("path resolution", async move {
                tokio::task::spawn_blocking(move || guard.resolve_links(&confined))
                    .await
                    .map_err(AccessError::internal)?
            })
            .await?;
        Ok(Resolved { display, path })
    }

    async fn with_io_timeout<T, F>(&self, operation: &str, future: F) -> AccessResult<T>
    where
        F: Future<Output = AccessResult<T>>,
    {
        tokio::time::timeout(self.config.io_timeout, future)
            .await
            .map_err(|_| {
                AccessError::Timeout(format!(
                    "{operation} exceeded {}s",
                    self.config.io_timeout.as_secs()
                ))
            })?
    }
}

/// Filesystem errors carry only the root-relative path.
fn io_error(error: std::io::Error, display: &str) -> AccessError {
    match error.kind() {
        ErrorKind::NotFound | ErrorKind::NotADirectory => {
            AccessError::not_found(display.to_string())
        }
        _ => AccessError::upstream(format!("{display}: {error}")),
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((index, _)) => format!("{}...", &value[..index]),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn service(root: &std::path::Path) -> CodeBridgeService {
        let config = CodeBridgeConfig::for_root(root, "secret").expect("config");
        CodeBridgeService::new(config)
    }

    fn run_enabled(root: &std::path::Path) -> CodeBridgeService {
        let mut config = CodeBridgeConfig::for_root(root, "secret").expect("config");
        config.allow_run = true;
        CodeBridgeService::new(config)
    }

    #[tokio::test]
    async fn empty_root_lists_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let listing = service(dir.path()).list(None).await.expect("listing");
        assert_eq!(listing.path, ".");
        assert!(listing.entries.is_empty());
    }

    #[tokio::test]
    async fn listing_is_sorted_and_typed() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("src")).expect("mkdir");
        std::fs::write(dir.path().join("b.txt"), "bb").expect("write");
        std::fs::write(dir.path().join("a.txt"), "a").expect("write");

        let listing = service(dir.path()).list(Some(".")).await.expect("listing");
        let names = listing
            .entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry.kind, entry.size))
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                ("a.txt", EntryKind::File, 1),
                ("b.txt", EntryKind::File, 2),
                ("src", EntryKind::Dir, 0),
            ]
        );
        assert!(listing.entries.iter().all(|entry| entry.modified.is_some()));
    }

    #[tokio::test]
    async fn listing_a_file_or_missing_dir_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "a").expect("write");
        let service = service(dir.path());

        assert!(matches!(
            service.list(Some("a.txt")).await,
            Err(AccessError::BadRequest(_))
        ));
        assert!(matches!(
            service.list(Some("nope")).await,
            Err(AccessError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn paths_under_a_regular_file_are_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "a").expect("write");
        let service = service(dir.path());

        assert!(matches!(
            service.list(Some("a.txt/b")).await,
            Err(AccessError::NotFound(_))
        ));
        assert!(matches!(
            service.read("a.txt/b").await,
            Err(AccessError::NotFound(_))
        ));
        assert!(matches!(
            service.write("a.txt/b", "x").await,
            Err(AccessError::NotFound(_))
        ));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).expect("read"), "a");
    }

    #[tokio::test]
    async fn write_then_read_round_trips_and_reports_update() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(dir.path());

        let first = service.write("src/a.txt", "hi").await.expect("write");
        assert_eq!(first.path, "src/a.txt");
        assert_eq!(first.action, WriteAction::Created);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/a.txt")).expect("on disk"),
            "hi"
        );

        let second = service.write("src/a.txt", "hi").await.expect("write");
        assert_eq!(second.action, WriteAction::Updated);
        assert_eq!(service.read("src/a.txt").await.expect("read"), b"hi".to_vec());
    }

    #[tokio::test]
    async fn write_replaces_the_whole_body() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(dir.path());

        service.write("notes.md", "a much longer body").await.expect("write");
        service.write("notes.md", "short").await.expect("write");
        assert_eq!(service.read("notes.md").await.expect("read"), b"short".to_vec());
    }

    #[tokio::test]
    async fn traversal_is_rejected_before_touching_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(dir.path());

        assert!(matches!(
            service.read("../../etc/passwd").await,
            Err(AccessError::PathEscape(_))
        ));
        assert!(matches!(
            service.write("../outside.txt", "x").await,
            Err(AccessError::PathEscape(_))
        ));
        let parent = dir.path().parent().expect("parent");
        assert!(!parent.join("outside.txt").exists());
    }

    #[tokio::test]
    async fn reading_missing_or_directory_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("src")).expect("mkdir");
        let service = service(dir.path());

        assert!(matches!(
            service.read("missing.txt").await,
            Err(AccessError::NotFound(_))
        ));
        assert!(matches!(
            service.read("src").await,
            Err(AccessError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn writing_over_a_directory_or_root_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("src")).expect("mkdir");
        let service = service(dir.path());

        assert!(matches!(
            service.write("src", "x").await,
            Err(AccessError::BadRequest(_))
        ));
        assert!(matches!(
            service.write(".", "x").await,
            Err(AccessError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn run_is_refused_while_gate_is_closed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(dir.path());

        let result = service.run("touch spawned.txt", None).await;
        assert!(matches!(result, Err(AccessError::CapabilityDisabled(_))));
        assert!(!dir.path().join("spawned.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_executes_in_confined_cwd() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("sub")).expect("mkdir");
        let service = run_enabled(dir.path());

        let outcome = service
            .run("echo fixed-output; pwd", Some("sub"))
            .await
            .expect("run");
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stdout.starts_with("fixed-output\n"));
        assert!(outcome.stdout.trim_end().ends_with("sub"));
    }

    #[tokio::test]
    async fn run_rejects_escaping_or_missing_cwd() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = run_enabled(dir.path());

        assert!(matches!(
            service.run("echo hi", Some("../")).await,
            Err(AccessError::PathEscape(_))
        ));
        assert!(matches!(
            service.run("echo hi", Some("missing")).await,
            Err(AccessError::BadRequest(_))
        ));
        assert!(matches!(
            service.run("   ", None).await,
            Err(AccessError::BadRequest(_))
        ));
    }

    #[test]
    fn long_commands_are_shortened_for_logs() {
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }
}
