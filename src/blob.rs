//! Blob storage for page markdown bodies.
//!
//! The [`BlobStore`] trait abstracts the object store that holds page
//! bodies, keyed by a relative path (`pages/{slug}.md`). Writes are
//! upserts so a retried persist never fails on an existing object.
//!
//! - [`FsBlobStore`]: directory-backed; writes go to a temp file that is
//!   renamed into place.
//! - [`InMemoryBlobStore`]: `HashMap` behind a `RwLock`, for tests.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

/// Object path of a page body.
pub fn page_blob_path(slug: &str) -> String {
    format!("pages/{}.md", slug)
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create or replace the object at `path`.
    async fn put(&self, path: &str, content: &str) -> Result<()>;

    /// Read the object at `path`, or `None` if it does not exist.
    async fn get(&self, path: &str) -> Result<Option<String>>;
}

// ============ Filesystem ============

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if path.is_empty() || escapes {
            bail!("invalid blob path: {}", path);
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, content: &str) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp = target.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .with_context(|| format!("Failed to move blob into {}", target.display()))?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<String>> {
        let target = self.resolve(path)?;
        match tokio::fs::read_to_string(&target).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", target.display())),
        }
    }
}

// ============ In-memory ============

#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: RwLock<HashMap<String, String>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop an object. Lets tests simulate a body that went missing.
    pub fn remove(&self, path: &str) {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.remove(path);
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, path: &str, content: &str) -> Result<()> {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<String>> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        Ok(objects.get(path).cloned())
    }
}
