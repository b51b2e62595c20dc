use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Result of a successful upload: enough to verify what landed without a
/// second round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobReceipt {
    pub blob_name: String,
    pub sha256: String,
    pub byte_size: u64,
    pub version_id: Option<String>,
}

#[async_trait]
pub trait BlobAdapter: Send + Sync {
    async fn ensure_container(&self) -> ade_core::Result<()>;

    async fn upload_path(
        &self,
        blob_name: &str,
        source: &Path,
        max_bytes: Option<u64>,
    ) -> ade_core::Result<BlobReceipt>;

    /// Same contract as [`BlobAdapter::upload_path`] but reads from an
    /// already-open reader instead of a filesystem path, for callers (e.g.
    /// a multipart upload body) with no source file on disk.
    async fn upload_stream(
        &self,
        blob_name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        max_bytes: Option<u64>,
    ) -> ade_core::Result<BlobReceipt>;

    async fn download_to_path(&self, blob_name: &str, destination: &Path)
        -> ade_core::Result<()>;

    /// Opens a blob for streaming read without buffering it fully into
    /// memory or staging it to a temp file first.
    async fn stream(
        &self,
        blob_name: &str,
    ) -> ade_core::Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// Filesystem-backed blob store: uploads copy into the container root, then
/// atomically rename into place so a reader never observes a partial write.
pub struct LocalBlobAdapter {
    root: std::path::PathBuf,
}

impl LocalBlobAdapter {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, blob_name: &str) -> ade_core::Result<std::path::PathBuf> {
        crate::paths::safe_join(&self.root, &[blob_name])
    }
}

#[async_trait]
impl BlobAdapter for LocalBlobAdapter {
    async fn ensure_container(&self) -> ade_core::Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn upload_path(
        &self,
        blob_name: &str,
        source: &Path,
        max_bytes: Option<u64>,
    ) -> ade_core::Result<BlobReceipt> {
        let destination = self.path_for(blob_name)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        let staging = destination.with_extension("uploading");
        let mut reader = fs::File::open(source).await?;
        let mut writer = fs::File::create(&staging).await?;
        let mut hasher = Sha256::new();
        let mut total: u64 = 0;
        let mut buf = [0u8; 64 * 1024];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if let Some(cap) = max_bytes {
                if total > cap {
                    drop(writer);
                    let _ = fs::remove_file(&staging).await;
                    return Err(ade_core::Error::FileTooLarge(format!(
                        "{blob_name} exceeds {cap} bytes"
                    )));
                }
            }
            hasher.update(&buf[..n]);
            tokio::io::AsyncWriteExt::write_all(&mut writer, &buf[..n]).await?;
        }
        writer.sync_all().await?;
        fs::rename(&staging, &destination).await?;

        Ok(BlobReceipt {
            blob_name: blob_name.to_string(),
            sha256: ::hex::encode(hasher.finalize()),
            byte_size: total,
            version_id: None,
        })
    }

    async fn upload_stream(
        &self,
        blob_name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        max_bytes: Option<u64>,
    ) -> ade_core::Result<BlobReceipt> {
        let destination = self.path_for(blob_name)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        let staging = destination.with_extension("uploading");
        let mut writer = fs::File::create(&staging).await?;
        let mut hasher = Sha256::new();
        let mut total: u64 = 0;
        let mut buf = [0u8; 64 * 1024];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if let Some(cap) = max_bytes {
                if total > cap {
                    drop(writer);
                    let _ = fs::remove_file(&staging).await;
                    return Err(ade_core::Error::FileTooLarge(format!(
                        "{blob_name} exceeds {cap} bytes"
                    )));
                }
            }
            hasher.update(&buf[..n]);
            tokio::io::AsyncWriteExt::write_all(&mut writer, &buf[..n]).await?;
        }
        writer.sync_all().await?;
        fs::rename(&staging, &destination).await?;

        Ok(BlobReceipt {
            blob_name: blob_name.to_string(),
            sha256: ::hex::encode(hasher.finalize()),
            byte_size: total,
            version_id: None,
        })
    }

    async fn download_to_path(
        &self,
        blob_name: &str,
        destination: &Path,
    ) -> ade_core::Result<()> {
        let source = self.path_for(blob_name)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&source, destination).await?;
        Ok(())
    }

    async fn stream(
        &self,
        blob_name: &str,
    ) -> ade_core::Result<Box<dyn AsyncRead + Send + Unpin>> {
        let source = self.path_for(blob_name)?;
        let file = fs::File::open(&source)
            .await
            .map_err(|_| ade_core::Error::NotFound(blob_name.to_string()))?;
        Ok(Box::new(file))
    }
}

/// S3-compatible object store adapter, used when `ADE_BLOB_BACKEND=s3`.
/// The teacher has no HTTP-client dependency; `reqwest` is adopted from the
/// wider example pack for this concern (see DESIGN.md).
pub struct ObjectStoreBlobAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl ObjectStoreBlobAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, blob_name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), blob_name)
    }
}

#[async_trait]
impl BlobAdapter for ObjectStoreBlobAdapter {
    async fn ensure_container(&self) -> ade_core::Result<()> {
        Ok(())
    }

    async fn upload_path(
        &self,
        blob_name: &str,
        source: &Path,
        max_bytes: Option<u64>,
    ) -> ade_core::Result<BlobReceipt> {
        let bytes = fs::read(source).await?;
        if let Some(cap) = max_bytes {
            if bytes.len() as u64 > cap {
                return Err(ade_core::Error::FileTooLarge(format!(
                    "{blob_name} exceeds {cap} bytes"
                )));
            }
        }
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let sha256 = ::hex::encode(hasher.finalize());
        let byte_size = bytes.len() as u64;

        let response = self
            .client
            .put(self.url_for(blob_name))
            .body(bytes)
            .send()
            .await
            .map_err(|err| ade_core::Error::Internal(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ade_core::Error::Internal(format!(
                "object store upload failed with status {}",
                response.status()
            )));
        }
        let version_id = response
            .headers()
            .get("x-version-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(BlobReceipt {
            blob_name: blob_name.to_string(),
            sha256,
            byte_size,
            version_id,
        })
    }

    async fn upload_stream(
        &self,
        blob_name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        max_bytes: Option<u64>,
    ) -> ade_core::Result<BlobReceipt> {
        let mut bytes = Vec::new();
        let mut hasher = Sha256::new();
        let mut total: u64 = 0;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if let Some(cap) = max_bytes {
                if total > cap {
                    return Err(ade_core::Error::FileTooLarge(format!(
                        "{blob_name} exceeds {cap} bytes"
                    )));
                }
            }
            hasher.update(&buf[..n]);
            bytes.extend_from_slice(&buf[..n]);
        }
        let sha256 = ::hex::encode(hasher.finalize());

        let response = self
            .client
            .put(self.url_for(blob_name))
            .body(bytes)
            .send()
            .await
            .map_err(|err| ade_core::Error::Internal(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ade_core::Error::Internal(format!(
                "object store upload failed with status {}",
                response.status()
            )));
        }
        let version_id = response
            .headers()
            .get("x-version-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(BlobReceipt {
            blob_name: blob_name.to_string(),
            sha256,
            byte_size: total,
            version_id,
        })
    }

    async fn download_to_path(
        &self,
        blob_name: &str,
        destination: &Path,
    ) -> ade_core::Result<()> {
        let response = self
            .client
            .get(self.url_for(blob_name))
            .send()
            .await
            .map_err(|err| ade_core::Error::Internal(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ade_core::Error::NotFound(blob_name.to_string()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ade_core::Error::Internal(err.to_string()))?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(destination, &bytes).await?;
        Ok(())
    }

    async fn stream(
        &self,
        blob_name: &str,
    ) -> ade_core::Result<Box<dyn AsyncRead + Send + Unpin>> {
        let response = self
            .client
            .get(self.url_for(blob_name))
            .send()
            .await
            .map_err(|err| ade_core::Error::Internal(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ade_core::Error::NotFound(blob_name.to_string()));
        }
        let byte_stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        Ok(Box::new(tokio_util::io::StreamReader::new(byte_stream)))
    }
}
