//! Artifact storage boundary (§6): turns finished screenshot bytes into a
//! retrievable URL. Thin by design — the spec treats the object store as an
//! external collaborator and only the local-disk default needs to exist for
//! the binary to run standalone.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::ScreenshotError;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, bytes: &[u8], content_type: &str) -> Result<String, ScreenshotError>;
}

/// Writes artifacts under `root/` and returns a `file://` URL, the same
/// atomic-write discipline [`crate::resource_cache`] uses for cache entries.
pub struct LocalDiskStore {
    root: PathBuf,
}

impl LocalDiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn extension_for(content_type: &str) -> &'static str {
        match content_type {
            "image/png" => "png",
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            _ => "bin",
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalDiskStore {
    async fn put(&self, bytes: &[u8], content_type: &str) -> Result<String, ScreenshotError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let ext = Self::extension_for(content_type);
        let name = format!("{}.{}", Uuid::new_v4(), ext);
        let path = self.root.join(&name);
        let tmp_path = self.root.join(format!("{name}.tmp"));

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        use tokio::io::AsyncWriteExt;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        let url = format!("file://{}", path.display());
        debug!(url = %url, bytes = bytes.len(), "artifact stored");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_writes_file_and_returns_file_url() {
        let dir = std::env::temp_dir().join(format!("screenshot-tool-storage-test-{}", Uuid::new_v4()));
        let store = LocalDiskStore::new(dir.clone());
        let url = store.put(b"fake png bytes", "image/png").await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with(".png"));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
