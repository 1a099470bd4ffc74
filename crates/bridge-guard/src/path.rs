//! Confinement of caller-supplied relative paths to a single root directory.

use std::path::{Component, Path, PathBuf};

use crate::error::{AccessError, AccessResult};
use crate::guard::ResourceGuard;

#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// `root` must already be absolute and canonical; configuration loading
    /// takes care of that.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Component-wise containment, so a sibling such as `<root>2` never
    /// counts as inside `<root>`.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Follows symlinks on the deepest existing ancestor of `confined` and
    /// re-checks containment. Performs filesystem I/O.
    pub fn resolve_links(&self, confined: &Path) -> AccessResult<PathBuf> {
        let shown = self.relative(confined);
        for ancestor in confined.ancestors() {
            if std::fs::symlink_metadata(ancestor).is_err() {
                continue;
            }
            // A dangling link fails here; its target cannot be checked.
            let real = std::fs::canonicalize(ancestor)
                .map_err(|_| AccessError::PathEscape(shown.clone()))?;
            if !self.contains(&real) {
                tracing::warn!(path = %shown, "symlink resolves outside root");
                return Err(AccessError::PathEscape(shown));
            }
            let rest = confined
                .strip_prefix(ancestor)
                .map_err(AccessError::internal)?;
            return Ok(if rest.as_os_str().is_empty() {
                real
            } else {
                real.join(rest)
            });
        }
        Err(AccessError::PathEscape(shown))
    }

    /// Renders `path` relative to the root with `/` separators; `.` for the
    /// root. Paths outside the root render as their file name only so host
    /// layout never reaches a response.
    pub fn relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rest) if rest.as_os_str().is_empty() => ".".to_string(),
            Ok(rest) => rest
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

impl ResourceGuard for PathGuard {
    type Candidate = str;
    type Confined = PathBuf;

    /// Maps `raw` to an absolute path under the root without touching the
    /// filesystem. Empty input means the root itself.
    fn confine(&self, raw: &str) -> AccessResult<PathBuf> {
        let requested = raw.trim();
        let requested = if requested.is_empty() { "." } else { requested };

        if requested.contains('\0') {
            return Err(AccessError::bad_request("path contains a NUL byte"));
        }
        // Refused before normalization, whatever it would resolve to.
        if has_parent_segment(requested) {
            return Err(AccessError::PathEscape(requested.to_string()));
        }

        let relative = requested.trim_start_matches(['/', '\\']);
        let mut confined = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::CurDir => {}
                Component::Normal(segment) => confined.push(segment),
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(AccessError::PathEscape(requested.to_string()));
                }
            }
        }

        if !self.contains(&confined) {
            return Err(AccessError::PathEscape(requested.to_string()));
        }
        tracing::debug!(requested, "path confined");
        Ok(confined)
    }
}

fn has_parent_segment(raw: &str) -> bool {
    raw.split(['/', '\\']).any(|segment| segment == "..")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn guard() -> PathGuard {
        PathGuard::new("/proj")
    }

    #[test]
    fn empty_and_dot_resolve_to_root() {
        let guard = guard();
        assert_eq!(guard.confine("").ok(), Some(PathBuf::from("/proj")));
        assert_eq!(guard.confine("  ").ok(), Some(PathBuf::from("/proj")));
        assert_eq!(guard.confine(".").ok(), Some(PathBuf::from("/proj")));
        assert_eq!(guard.confine("./.").ok(), Some(PathBuf::from("/proj")));
    }

    #[test]
    fn descendants_are_normalized_under_root() {
        let guard = guard();
        assert_eq!(
            guard.confine("src/a.txt").ok(),
            Some(PathBuf::from("/proj/src/a.txt"))
        );
        assert_eq!(
            guard.confine("./src//./lib.rs").ok(),
            Some(PathBuf::from("/proj/src/lib.rs"))
        );
        assert_eq!(
            guard.confine("/src/main.rs").ok(),
            Some(PathBuf::from("/proj/src/main.rs"))
        );
    }

    #[test]
    fn any_parent_segment_is_rejected() {
        let guard = guard();
        for raw in [
            "..",
            "../../etc/passwd",
            "src/../a.txt",
            "src/..",
            "a/b/../../..",
            "..\\windows",
            "src\\..\\..\\x",
            "/../proj/a",
        ] {
            assert!(
                matches!(guard.confine(raw), Err(AccessError::PathEscape(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn dotted_names_that_are_not_parent_segments_are_allowed() {
        let guard = guard();
        assert_eq!(
            guard.confine("..hidden/...").ok(),
            Some(PathBuf::from("/proj/..hidden/..."))
        );
        assert_eq!(
            guard.confine("notes..md").ok(),
            Some(PathBuf::from("/proj/notes..md"))
        );
    }

    #[test]
    fn sibling_with_shared_prefix_is_not_contained() {
        let guard = guard();
        assert!(!guard.contains(Path::new("/proj2/file")));
        assert!(!guard.contains(Path::new("/pro")));
        assert!(guard.contains(Path::new("/proj")));
        assert!(guard.contains(Path::new("/proj/sub/file")));
    }

    #[test]
    fn nul_bytes_are_a_bad_request() {
        assert!(matches!(
            guard().confine("a\0b"),
            Err(AccessError::BadRequest(_))
        ));
    }

    #[test]
    fn accepted_paths_keep_root_as_component_prefix() {
        let guard = guard();
        for raw in ["a", "a/b/c", "./x/./y", "deep/er/file.txt", "/"] {
            let confined = guard.confine(raw).unwrap_or_default();
            assert!(confined.starts_with("/proj"), "{raw} -> {confined:?}");
            let rendered = confined.to_string_lossy().into_owned();
            assert!(rendered == "/proj" || rendered.starts_with("/proj/"));
        }
    }

    #[test]
    fn relative_rendering_hides_host_layout() {
        let guard = guard();
        assert_eq!(guard.relative(Path::new("/proj")), ".");
        assert_eq!(guard.relative(Path::new("/proj/src/a.txt")), "src/a.txt");
        assert_eq!(guard.relative(Path::new("/etc/passwd")), "passwd");
    }

    #[test]
    fn resolve_links_accepts_missing_descendants() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonical root");
        let guard = PathGuard::new(&root);

        let confined = guard.confine("new/dir/file.txt").expect("confined");
        let resolved = guard.resolve_links(&confined).expect("resolved");
        assert_eq!(resolved, root.join("new/dir/file.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn resolve_links_rejects_symlink_escaping_root() {
        let outside = tempfile::tempdir().expect("outside");
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonical root");
        std::os::unix::fs::symlink(outside.path(), root.join("escape")).expect("symlink");
        std::os::unix::fs::symlink("/nonexistent/target", root.join("dangling"))
            .expect("symlink");
        let guard = PathGuard::new(&root);

        let through_link = guard.confine("escape/secret.txt").expect("lexically fine");
        assert!(matches!(
            guard.resolve_links(&through_link),
            Err(AccessError::PathEscape(_))
        ));

        let dangling = guard.confine("dangling").expect("lexically fine");
        assert!(matches!(
            guard.resolve_links(&dangling),
            Err(AccessError::PathEscape(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn resolve_links_follows_links_that_stay_inside() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonical root");
        std::fs::create_dir(root.join("real")).expect("mkdir");
        std::os::unix::fs::symlink(root.join("real"), root.join("alias")).expect("symlink");
        let guard = PathGuard::new(&root);

        let confined = guard.confine("alias/file.txt").expect("confined");
        assert_eq!(
            guard.resolve_links(&confined).ok(),
            Some(root.join("real/file.txt"))
        );
    }
}
