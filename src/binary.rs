//! Binary payload store.
//!
//! Payloads live on the filesystem, one file per node id, under the configured
//! blob root. The metadata and payload stores are expected to agree; a missing
//! payload for a node that should have one is surfaced as a not-found kind and
//! treated by the controller as a store-inconsistency condition, never
//! auto-repaired.

use crate::error::{Error, Result};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

/// Filesystem-backed blob store keyed by node id.
pub struct BinaryDataStore {
    root: PathBuf,
}

impl BinaryDataStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::PayloadAccess(format!("creating blob root: {e}")))?;
        Ok(BinaryDataStore { root })
    }

    fn path_for(&self, node_id: &str) -> PathBuf {
        self.root.join(node_id)
    }

    /// Store a new payload; returns the number of bytes written.
    pub async fn create(&self, node_id: &str, payload: &[u8]) -> Result<u64> {
        self.write_payload(node_id, payload).await
    }

    /// Overwrite an existing payload; returns the number of bytes written.
    pub async fn update(&self, node_id: &str, payload: &[u8]) -> Result<u64> {
        self.write_payload(node_id, payload).await
    }

    async fn write_payload(&self, node_id: &str, payload: &[u8]) -> Result<u64> {
        let path = self.path_for(node_id);
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| access_error(&path, e))?;
        file.write_all(payload)
            .await
            .map_err(|e| access_error(&path, e))?;
        file.flush().await.map_err(|e| access_error(&path, e))?;
        debug!(node_id, bytes = payload.len(), "payload written");
        Ok(payload.len() as u64)
    }

    /// Delete the payload for a node id.
    pub async fn delete(&self, node_id: &str) -> Result<()> {
        let path = self.path_for(node_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::PayloadNotFound(node_id.to_string()))
            }
            Err(e) => Err(access_error(&path, e)),
        }
    }

    /// Byte length of the stored payload.
    pub async fn size(&self, node_id: &str) -> Result<u64> {
        let path = self.path_for(node_id);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::PayloadNotFound(node_id.to_string()))
            }
            Err(e) => Err(access_error(&path, e)),
        }
    }

    /// Read `length` bytes starting at `offset`. The caller is responsible for
    /// requesting a window inside the payload.
    pub async fn read_range(&self, node_id: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let path = self.path_for(node_id);
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::PayloadNotFound(node_id.to_string()));
            }
            Err(e) => return Err(access_error(&path, e)),
        };
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| access_error(&path, e))?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf)
            .await
            .map_err(|e| access_error(&path, e))?;
        Ok(buf)
    }

    /// Read the entire payload.
    pub async fn read_all(&self, node_id: &str) -> Result<Vec<u8>> {
        let size = self.size(node_id).await?;
        self.read_range(node_id, 0, size).await
    }
}

fn access_error(path: &Path, e: std::io::Error) -> Error {
    Error::PayloadAccess(format!("{}: {e}", path.display()))
}
