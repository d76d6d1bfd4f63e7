//! Content-addressed storage for snapshot bytes.
//!
//! Blobs are keyed by the hex SHA-256 of their content and laid out as
//! `<root>/ab/cdef...`. Writes go to a temp file in the target directory and
//! are renamed into place, so a reader never sees a partial blob.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

/// Hex SHA-256 of `bytes`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Content-addressed blob directory.
///
/// Writers that stage blobs and then reference them in the database hold a
/// [`stage_guard`](Self::stage_guard) across both steps; garbage collection
/// holds the exclusive [`sweep_guard`](Self::sweep_guard), so a blob is never
/// swept between being staged and being referenced.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    sweep: Arc<RwLock<()>>,
}

impl BlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            sweep: Arc::new(RwLock::new(())),
        }
    }

    pub async fn stage_guard(&self) -> OwnedRwLockReadGuard<()> {
        self.sweep.clone().read_owned().await
    }

    pub async fn sweep_guard(&self) -> OwnedRwLockWriteGuard<()> {
        self.sweep.clone().write_owned().await
    }

    /// Location of a blob. Anything other than a 64-character lowercase hex
    /// digest has no location.
    fn path_for(&self, hash: &str) -> Option<PathBuf> {
        let valid = hash.len() == 64
            && hash
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| self.root.join(&hash[..2]).join(&hash[2..]))
    }

    /// Store `bytes` and return their hash. Storing existing content is a no-op.
    pub async fn put(&self, bytes: &[u8]) -> io::Result<String> {
        let hash = hash_bytes(bytes);
        let path = self
            .path_for(&hash)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid blob hash"))?;

        if tokio::fs::try_exists(&path).await? {
            return Ok(hash);
        }

        let bytes = bytes.to_vec();
        let size = bytes.len();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let dir = path
                .parent()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "blob path has no parent"))?;
            std::fs::create_dir_all(dir)?;

            let mut temp_file = NamedTempFile::new_in(dir)?;
            temp_file.write_all(&bytes)?;
            temp_file.as_file().sync_all()?;
            temp_file.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(io::Error::other)??;

        debug!(hash = %hash, size, "Stored blob");
        Ok(hash)
    }

    /// Bytes for `hash`, or `None` when absent.
    pub async fn get(&self, hash: &str) -> io::Result<Option<Vec<u8>>> {
        let Some(path) = self.path_for(hash) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn contains(&self, hash: &str) -> io::Result<bool> {
        match self.path_for(hash) {
            Some(path) => tokio::fs::try_exists(&path).await,
            None => Ok(false),
        }
    }

    /// Delete a blob. Missing blobs are ignored.
    pub async fn remove(&self, hash: &str) -> io::Result<()> {
        let Some(path) = self.path_for(hash) else {
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(hash, "Removed blob");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
