//! BlobStore - Screenshot Image Storage
//!
//! ## Responsibilities
//!
//! - Full-object writes of captured / annotated frames
//! - The canonical path layout:
//!   `<root>/<YYYY-MM-DD>/<ip_underscored>_<start>_<end>_<channel>.jpg`,
//!   annotated variants with `_detected` before the extension
//! - Existence checks for the image list endpoints

use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Screenshot blob store rooted at one directory
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub async fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative path of the raw frame for one capture window.
    pub fn frame_rel_path(
        date: &str,
        ip: &str,
        start_ts: i64,
        end_ts: i64,
        channel: &str,
    ) -> String {
        format!(
            "{}/{}_{}_{}_{}.jpg",
            date,
            ip.replace('.', "_"),
            start_ts,
            end_ts,
            channel
        )
    }

    /// Annotated variant of a relative frame path.
    pub fn detected_rel_path(rel: &str) -> String {
        match rel.rsplit_once('.') {
            Some((stem, ext)) => format!("{}_detected.{}", stem, ext),
            None => format!("{}_detected", rel),
        }
    }

    /// Absolute path under the root.
    pub fn abs_path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Write bytes under a relative path, creating parent directories.
    pub async fn put(&self, rel: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.abs_path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;

        tracing::debug!(
            path = %path.display(),
            size = data.len(),
            "Blob written"
        );
        Ok(path)
    }

    pub async fn read(&self, rel: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.abs_path(rel)).await?)
    }

    /// Synchronous existence check (used behind the facade's stat cache).
    pub fn exists(&self, rel: &str) -> bool {
        self.abs_path(rel).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_path_layout() {
        let rel = BlobStore::frame_rel_path(
            "2025-12-19",
            "192.168.54.227",
            1766073600,
            1766074199,
            "c1",
        );
        assert_eq!(
            rel,
            "2025-12-19/192_168_54_227_1766073600_1766074199_c1.jpg"
        );
        assert_eq!(
            BlobStore::detected_rel_path(&rel),
            "2025-12-19/192_168_54_227_1766073600_1766074199_c1_detected.jpg"
        );
    }

    #[tokio::test]
    async fn test_put_and_read() {
        let root = std::env::temp_dir().join(format!("parkwatch-blob-{}", std::process::id()));
        let store = BlobStore::new(root.clone()).await.unwrap();

        let rel = "2025-12-19/test.jpg";
        assert!(!store.exists(rel));
        store.put(rel, b"jpeg-bytes").await.unwrap();
        assert!(store.exists(rel));
        assert_eq!(store.read(rel).await.unwrap(), b"jpeg-bytes");

        let _ = tokio::fs::remove_dir_all(root).await;
    }
}
