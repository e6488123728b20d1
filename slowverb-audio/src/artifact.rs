//! Revocable references to rendered files
//!
//! Encoded bytes live in an [`ArtifactStore`] under an opaque URL until the
//! URL is revoked. A presentation layer resolves or saves through the URL.

use crate::wav::WavHeader;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// File name used when saving a rendered artifact
pub const DOWNLOAD_FILE_NAME: &str = "reverb-song.wav";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact {0} has been revoked")]
    Revoked(ArtifactUrl),
    #[error("failed to write artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque handle to stored bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactUrl(String);

impl ArtifactUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A finished render, as handed to the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedArtifact {
    pub url: ArtifactUrl,
    /// Encoded size in bytes
    pub size: usize,
    pub header: WavHeader,
}

#[derive(Default)]
struct StoreInner {
    next_id: u64,
    blobs: HashMap<ArtifactUrl, Arc<Vec<u8>>>,
}

/// Shared registry of live artifacts
#[derive(Clone, Default)]
pub struct ArtifactStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register bytes and return a fresh URL for them
    pub fn create(&self, bytes: Vec<u8>) -> ArtifactUrl {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let url = ArtifactUrl(format!("blob:slowverb/{}", inner.next_id));
        inner.blobs.insert(url.clone(), Arc::new(bytes));
        url
    }

    pub fn resolve(&self, url: &ArtifactUrl) -> Option<Arc<Vec<u8>>> {
        self.inner.lock().blobs.get(url).cloned()
    }

    /// Release the bytes behind `url`. Returns false if it was already gone.
    pub fn revoke(&self, url: &ArtifactUrl) -> bool {
        let removed = self.inner.lock().blobs.remove(url).is_some();
        if removed {
            tracing::debug!(%url, "artifact revoked");
        }
        removed
    }

    /// Release everything, returning how many URLs were live
    pub fn revoke_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.blobs.len();
        inner.blobs.clear();
        count
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().blobs.len()
    }

    /// Write the artifact into `folder` under the download file name
    pub fn save(&self, url: &ArtifactUrl, folder: &Path) -> Result<PathBuf, ArtifactError> {
        let bytes = self
            .resolve(url)
            .ok_or_else(|| ArtifactError::Revoked(url.clone()))?;
        std::fs::create_dir_all(folder)?;
        let path = folder.join(DOWNLOAD_FILE_NAME);
        std::fs::write(&path, bytes.as_slice())?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "saved rendered file");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_are_unique() {
        let store = ArtifactStore::new();
        let a = store.create(vec![1]);
        let b = store.create(vec![2]);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("blob:slowverb/"));
        assert_eq!(store.resolve(&b).unwrap().as_slice(), &[2]);
    }

    #[test]
    fn test_revoke() {
        let store = ArtifactStore::new();
        let url = store.create(vec![1, 2, 3]);
        assert!(store.revoke(&url));
        assert!(!store.revoke(&url));
        assert!(store.resolve(&url).is_none());
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn test_revoke_all() {
        let store = ArtifactStore::new();
        store.create(vec![1]);
        store.create(vec![2]);
        assert_eq!(store.revoke_all(), 2);
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn test_clones_share_registry() {
        let store = ArtifactStore::new();
        let other = store.clone();
        let url = store.create(vec![9]);
        assert!(other.resolve(&url).is_some());
        other.revoke(&url);
        assert!(store.resolve(&url).is_none());
    }

    #[test]
    fn test_save_writes_file() {
        let store = ArtifactStore::new();
        let url = store.create(b"RIFFdata".to_vec());
        let folder = std::env::temp_dir().join(format!("slowverb-save-{}", std::process::id()));
        let path = store.save(&url, &folder).unwrap();
        assert_eq!(path.file_name().unwrap(), DOWNLOAD_FILE_NAME);
        assert_eq!(std::fs::read(&path).unwrap(), b"RIFFdata");
        std::fs::remove_dir_all(&folder).ok();
    }

    #[test]
    fn test_save_revoked_fails() {
        let store = ArtifactStore::new();
        let url = store.create(vec![1]);
        store.revoke(&url);
        let err = store.save(&url, &std::env::temp_dir()).unwrap_err();
        assert!(matches!(err, ArtifactError::Revoked(_)));
    }
}
