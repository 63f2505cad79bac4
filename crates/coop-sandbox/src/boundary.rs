//! Context boundary: every path a sandbox touches must resolve inside one root

use coop_core::{CoopError, Result};
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// A canonical root directory and the rules for resolving paths against it
#[derive(Debug, Clone)]
pub struct ContextBoundary {
    root: PathBuf,
}

impl ContextBoundary {
    /// Create the root if needed and pin it to its canonical form
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when `path` resolves to the root or a descendant
    pub fn validate(&self, path: &str) -> bool {
        self.resolve(Path::new(path))
            .is_some_and(|p| p.starts_with(&self.root))
    }

    /// Resolve `path` against the root, or fail with a boundary violation
    pub fn get_safe_path(&self, path: &str) -> Result<PathBuf> {
        match self.resolve(Path::new(path)) {
            Some(resolved) if resolved.starts_with(&self.root) => Ok(resolved),
            _ => {
                warn!("Rejected path outside sandbox root: {}", path);
                Err(CoopError::BoundaryViolation(path.to_string()))
            }
        }
    }

    /// Walk `path` one component at a time from the root
    ///
    /// Components that exist are canonicalized, so symlinks are followed before
    /// any later `..` is applied. A dangling symlink cannot be resolved and
    /// yields `None`.
    fn resolve(&self, path: &Path) -> Option<PathBuf> {
        let mut current = self.root.clone();

        for component in path.components() {
            match component {
                Component::Prefix(_) | Component::RootDir => {
                    current = PathBuf::from(component.as_os_str());
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    current.pop();
                }
                Component::Normal(name) => {
                    let candidate = current.join(name);
                    match std::fs::symlink_metadata(&candidate) {
                        Ok(meta) if meta.file_type().is_symlink() => {
                            current = candidate.canonicalize().ok()?;
                        }
                        _ => current = candidate,
                    }
                }
            }
        }

        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn boundary() -> (TempDir, ContextBoundary) {
        let dir = TempDir::new().unwrap();
        let b = ContextBoundary::new(dir.path().join("root")).unwrap();
        (dir, b)
    }

    #[test]
    fn test_traversal_rejected() {
        let (_dir, b) = boundary();
        assert!(!b.validate("../../etc/passwd"));
        let err = b.get_safe_path("../../etc/passwd").unwrap_err();
        assert!(matches!(err, CoopError::BoundaryViolation(_)));
    }

    #[test]
    fn test_descendant_accepted() {
        let (_dir, b) = boundary();
        let p = b.get_safe_path("sub/file.txt").unwrap();
        assert!(p.starts_with(b.root()));
        assert!(p.ends_with("sub/file.txt"));
    }

    #[test]
    fn test_root_itself_accepted() {
        let (_dir, b) = boundary();
        assert_eq!(b.get_safe_path("").unwrap(), b.root());
        assert_eq!(b.get_safe_path(".").unwrap(), b.root());
    }

    #[test]
    fn test_inner_parent_dir_allowed() {
        let (_dir, b) = boundary();
        let p = b.get_safe_path("a/b/../c.txt").unwrap();
        assert_eq!(p, b.root().join("a/c.txt"));
    }

    #[test]
    fn test_absolute_outside_rejected() {
        let (_dir, b) = boundary();
        assert!(!b.validate("/etc/passwd"));
    }

    #[test]
    fn test_absolute_inside_accepted() {
        let (_dir, b) = boundary();
        let inside = b.root().join("x.py");
        assert!(b.validate(inside.to_str().unwrap()));
    }

    #[test]
    fn test_sibling_with_shared_prefix_rejected() {
        let dir = TempDir::new().unwrap();
        let b = ContextBoundary::new(dir.path().join("root")).unwrap();
        std::fs::create_dir_all(dir.path().join("root2")).unwrap();
        assert!(!b.validate("../root2/file"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let (dir, b) = boundary();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, b.root().join("link")).unwrap();

        assert!(!b.validate("link/secret.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_then_parent_resolves_after_link() {
        let (dir, b) = boundary();
        let outside = dir.path().join("outside/deep");
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, b.root().join("link")).unwrap();

        // link/.. is the link target's parent, which is outside the root
        assert!(!b.validate("link/../x"));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_rejected() {
        let (_dir, b) = boundary();
        std::os::unix::fs::symlink("/nonexistent/target", b.root().join("ghost")).unwrap();
        assert!(!b.validate("ghost"));
    }

    #[cfg(unix)]
    #[test]
    fn test_internal_symlink_accepted() {
        let (_dir, b) = boundary();
        std::fs::create_dir_all(b.root().join("real")).unwrap();
        std::os::unix::fs::symlink(b.root().join("real"), b.root().join("alias")).unwrap();
        let p = b.get_safe_path("alias/file.txt").unwrap();
        assert_eq!(p, b.root().join("real/file.txt"));
    }
}
