use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt::Debug;
use std::path::PathBuf;
use tokio::fs;

#[derive(Debug, Clone)]
pub struct UploadedAsset {
    pub url: String,
    pub external_id: String,
}

/// Sink for generated image bytes. Idempotent by (folder, logical_id):
/// re-uploading overwrites and yields the same URL.
#[async_trait]
pub trait AssetUploader: Send + Sync + Debug {
    async fn upload(
        &self,
        bytes: &[u8],
        logical_id: &str,
        folder: &str,
        format: &str,
    ) -> Result<UploadedAsset>;
}

/// Writes assets to local disk under `root` and returns URLs rooted at
/// `base_url`. With `base_url` pointing at the output directory itself
/// the URLs double as plain file paths, which the HTTP API serves under
/// /outputs.
#[derive(Debug)]
pub struct DiskUploader {
    root: PathBuf,
    base_url: String,
}

impl DiskUploader {
    pub fn new(root: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AssetUploader for DiskUploader {
    async fn upload(
        &self,
        bytes: &[u8],
        logical_id: &str,
        folder: &str,
        format: &str,
    ) -> Result<UploadedAsset> {
        let filename = format!("{}.{}", logical_id, format);
        let dir = self.root.join(folder);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create asset folder {:?}", dir))?;
        let path = dir.join(&filename);
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write asset {:?}", path))?;

        Ok(UploadedAsset {
            url: format!("{}/{}/{}", self.base_url, folder, filename),
            external_id: format!("{}/{}", folder, logical_id),
        })
    }
}
