//! File operations confined to a context boundary

use crate::boundary::ContextBoundary;
use coop_core::{CoopError, Result};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FileOps {
    boundary: Arc<ContextBoundary>,
}

impl FileOps {
    pub fn new(boundary: Arc<ContextBoundary>) -> Self {
        Self { boundary }
    }

    pub fn boundary(&self) -> &ContextBoundary {
        &self.boundary
    }

    pub async fn read(&self, path: &str) -> Result<String> {
        let safe = self.boundary.get_safe_path(path)?;
        let content = fs::read_to_string(&safe).await?;
        debug!("Read {} bytes from {}", content.len(), safe.display());
        Ok(content)
    }

    /// Write `content` verbatim, creating parent directories
    pub async fn write(&self, path: &str, content: &str) -> Result<()> {
        let safe = self.boundary.get_safe_path(path)?;
        if safe == self.boundary.root() {
            return Err(CoopError::Sandbox(
                "Cannot write to the sandbox root itself".to_string(),
            ));
        }
        if let Some(parent) = safe.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&safe, content.as_bytes()).await?;
        debug!("Wrote {} bytes to {}", content.len(), safe.display());
        Ok(())
    }

    /// Sorted entry names; directories carry a trailing `/`
    pub async fn list(&self, path: &str) -> Result<Vec<String>> {
        let safe = self.boundary.get_safe_path(path)?;
        let mut entries = fs::read_dir(&safe).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().await?.is_dir() {
                name.push('/');
            }
            names.push(name);
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ops() -> (TempDir, FileOps) {
        let dir = TempDir::new().unwrap();
        let boundary = Arc::new(ContextBoundary::new(dir.path()).unwrap());
        (dir, FileOps::new(boundary))
    }

    #[tokio::test]
    async fn test_write_then_read_is_byte_identical() {
        let (_dir, ops) = ops();
        let content = "line one\n\ttabbed\r\nunicode: héllo ✓\n\n";
        ops.write("nested/dir/file.txt", content).await.unwrap();
        assert_eq!(ops.read("nested/dir/file.txt").await.unwrap(), content);
    }

    #[tokio::test]
    async fn test_list_marks_directories() {
        let (_dir, ops) = ops();
        ops.write("b.txt", "").await.unwrap();
        ops.write("a/inner.txt", "").await.unwrap();
        assert_eq!(ops.list("").await.unwrap(), vec!["a/", "b.txt"]);
    }

    #[tokio::test]
    async fn test_escape_rejected_for_every_operation() {
        let (_dir, ops) = ops();
        assert!(matches!(
            ops.read("../outside.txt").await,
            Err(CoopError::BoundaryViolation(_))
        ));
        assert!(matches!(
            ops.write("../outside.txt", "x").await,
            Err(CoopError::BoundaryViolation(_))
        ));
        assert!(matches!(
            ops.list("..").await,
            Err(CoopError::BoundaryViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_read_missing_file_is_io_error() {
        let (_dir, ops) = ops();
        assert!(matches!(ops.read("nope.txt").await, Err(CoopError::Io(_))));
    }
}
