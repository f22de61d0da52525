//! Backend over a directory on the local filesystem

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::{Backend, BackendError};

/// Local repository. Writes land directly; there is no staging area.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, BackendError> {
        let relative = Path::new(path.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || path.trim_matches('/').is_empty() {
            return Err(BackendError::InvalidFile {
                path: path.to_string(),
                message: "path must stay inside the repository".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

fn not_found(path: &str) -> impl FnOnce(std::io::Error) -> BackendError + '_ {
    move |e| {
        if e.kind() == ErrorKind::NotFound {
            BackendError::NotFound(path.to_string())
        } else {
            BackendError::Io(e)
        }
    }
}

async fn ensure_parent(path: &Path) -> Result<(), BackendError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl Backend for LocalBackend {
    async fn list_files(&self) -> Result<Vec<String>, BackendError> {
        let mut files = Vec::new();
        let mut pending = vec![PathBuf::new()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(self.root.join(&dir)).await?;
            while let Some(entry) = entries.next_entry().await? {
                let relative = dir.join(entry.file_name());
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    // Hidden directories (.git and friends) are not resources
                    if !entry.file_name().to_string_lossy().starts_with('.') {
                        pending.push(relative);
                    }
                } else if relative.extension().is_some_and(|ext| ext == "json") {
                    let parts: Vec<_> = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    files.push(parts.join("/"));
                }
            }
        }

        files.sort();
        Ok(files)
    }

    async fn read_file(&self, path: &str) -> Result<JsonValue, BackendError> {
        let full = self.resolve(path)?;
        let bytes = fs::read(&full).await.map_err(not_found(path))?;
        serde_json::from_slice(&bytes).map_err(|e| BackendError::InvalidFile {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    async fn write_file(
        &self,
        path: &str,
        body: &JsonValue,
        _message: &str,
    ) -> Result<(), BackendError> {
        let full = self.resolve(path)?;
        ensure_parent(&full).await?;
        let bytes = serde_json::to_vec_pretty(body).map_err(|e| BackendError::InvalidFile {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        fs::write(&full, bytes).await?;
        debug!("Wrote {}", full.display());
        Ok(())
    }

    async fn delete_file(&self, path: &str, _message: &str) -> Result<(), BackendError> {
        let full = self.resolve(path)?;
        if path.ends_with('/') {
            fs::remove_dir_all(&full).await.map_err(not_found(path))?;
        } else {
            fs::remove_file(&full).await.map_err(not_found(path))?;
        }
        debug!("Deleted {}", full.display());
        Ok(())
    }

    async fn move_file(&self, from: &str, to: &str, _message: &str) -> Result<(), BackendError> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if fs::metadata(&source).await.is_err() {
            return Err(BackendError::NotFound(from.to_string()));
        }
        ensure_parent(&target).await?;
        fs::rename(&source, &target).await?;
        debug!("Moved {} to {}", source.display(), target.display());
        Ok(())
    }

    async fn test(&self) -> Result<(), BackendError> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            BackendError::Other(format!("cannot access {}: {}", self.root.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(BackendError::Other(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_write_list_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());

        backend
            .write_file("dashboards/a.json", &json!({"title": "A"}), "add a")
            .await
            .unwrap();
        backend
            .write_file("b.json", &json!({"title": "B"}), "add b")
            .await
            .unwrap();
        std::fs::write(dir.path().join("README.md"), "not a resource").unwrap();

        let files = backend.list_files().await.unwrap();
        assert_eq!(files, vec!["b.json", "dashboards/a.json"]);

        let body = backend.read_file("dashboards/a.json").await.unwrap();
        assert_eq!(body["title"], "A");
    }

    #[tokio::test]
    async fn test_missing_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let missing = backend.read_file("nope.json").await.unwrap_err();
        assert!(missing.is_not_found());

        let invalid = backend.read_file("broken.json").await.unwrap_err();
        assert!(matches!(invalid, BackendError::InvalidFile { .. }));

        let escape = backend.read_file("../outside.json").await.unwrap_err();
        assert!(matches!(escape, BackendError::InvalidFile { .. }));
    }

    #[tokio::test]
    async fn test_delete_file_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        for path in ["one.json", "folder/two.json", "folder/three.json"] {
            backend.write_file(path, &json!({}), "seed").await.unwrap();
        }

        backend.delete_file("one.json", "rm").await.unwrap();
        backend.delete_file("folder/", "rm").await.unwrap();
        assert!(backend.list_files().await.unwrap().is_empty());

        let err = backend.delete_file("one.json", "rm").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_move_file_creates_target_directory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        backend
            .write_file("a.json", &json!({"n": 1}), "seed")
            .await
            .unwrap();

        backend
            .move_file("a.json", "archive/a.json", "mv")
            .await
            .unwrap();
        assert_eq!(backend.list_files().await.unwrap(), vec!["archive/a.json"]);
    }

    #[tokio::test]
    async fn test_health_check() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalBackend::new(dir.path()).test().await.is_ok());
        assert!(
            LocalBackend::new(dir.path().join("missing"))
                .test()
                .await
                .is_err()
        );
    }
}
