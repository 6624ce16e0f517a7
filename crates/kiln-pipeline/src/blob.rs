//! Blob storage for uploaded file bytes.

use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Put-by-key, fetch-by-URL object storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key` and return the URL they can be fetched from.
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> PipelineResult<String>;

    /// Read back the bytes behind a URL returned by [`BlobStore::put`].
    async fn fetch(&self, url: &str) -> PipelineResult<Vec<u8>>;
}

/// Blob store rooted in a local directory.
///
/// URLs are `file://` paths unless a public base URL is configured, in which
/// case they are `<base>/<key>`. Remote `http(s)` URLs are fetched with a
/// size cap.
#[derive(Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: Option<String>,
    max_fetch_bytes: u64,
    http: reqwest::Client,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<String>, max_fetch_bytes: u64) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
            max_fetch_bytes,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &kiln_config::Config) -> PipelineResult<Self> {
        let paths = config.resolve_paths()?;
        Ok(Self::new(
            paths.blob_dir,
            config.storage.public_base_url.clone(),
            config.storage.max_fetch_bytes,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key below the root, refusing anything that escapes it.
    fn key_path(&self, key: &str) -> PipelineResult<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(PipelineError::Blob(format!("invalid blob key: {}", key)));
        }
        Ok(self.root.join(relative))
    }

    fn url_for(&self, key: &str, path: &Path) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base, key),
            None => format!("file://{}", path.display()),
        }
    }

    async fn read_local(&self, path: &Path) -> PipelineResult<Vec<u8>> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| PipelineError::FileNotFound(path.to_path_buf()))?;
        if metadata.len() > self.max_fetch_bytes {
            return Err(PipelineError::Blob(format!(
                "{} is {} bytes, over the {} byte limit",
                path.display(),
                metadata.len(),
                self.max_fetch_bytes
            )));
        }
        Ok(tokio::fs::read(path).await?)
    }

    async fn read_remote(&self, url: &str) -> PipelineResult<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::Blob(format!("fetching {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Blob(format!(
                "fetching {} returned HTTP {}",
                url,
                status.as_u16()
            )));
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| PipelineError::Blob(format!("reading {} failed: {}", url, e)))?;
            if (bytes.len() + chunk.len()) as u64 > self.max_fetch_bytes {
                return Err(PipelineError::Blob(format!(
                    "{} exceeds the {} byte limit",
                    url, self.max_fetch_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(bytes)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> PipelineResult<String> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        debug!("Stored {} bytes ({}) at {:?}", bytes.len(), content_type, path);
        Ok(self.url_for(key, &path))
    }

    async fn fetch(&self, url: &str) -> PipelineResult<Vec<u8>> {
        if let Some(path) = url.strip_prefix("file://") {
            return self.read_local(Path::new(path)).await;
        }

        // Our own public URLs are served from the local root
        if let Some(base) = &self.public_base_url {
            if let Some(key) = url.strip_prefix(base.as_str()).and_then(|k| k.strip_prefix('/')) {
                let path = self.key_path(key)?;
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return self.read_local(&path).await;
                }
            }
        }

        if url.starts_with("http://") || url.starts_with("https://") {
            return self.read_remote(url).await;
        }

        Err(PipelineError::Blob(format!("unsupported blob URL: {}", url)))
    }
}

/// In-memory blob store; URLs are `memory://<key>`.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bytes directly, returning their URL.
    pub fn insert(&self, key: &str, bytes: impl Into<Vec<u8>>) -> String {
        let url = format!("memory://{}", key);
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(url.clone(), bytes.into());
        }
        url
    }

    /// Serve `bytes` at an arbitrary URL, such as a public `https` link.
    pub fn insert_url(&self, url: &str, bytes: impl Into<Vec<u8>>) {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(url.to_string(), bytes.into());
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> PipelineResult<String> {
        Ok(self.insert(key, bytes))
    }

    async fn fetch(&self, url: &str) -> PipelineResult<Vec<u8>> {
        self.blobs
            .lock()
            .map_err(|_| PipelineError::Blob("blob store lock poisoned".to_string()))?
            .get(url)
            .cloned()
            .ok_or_else(|| PipelineError::Blob(format!("no blob at {}", url)))
    }
}
