//! Attachment storage: opaque blobs on disk plus a JSON sidecar carrying
//! the upload metadata.
//!
//! Messages reference attachments by relative `/uploads/<id>` URL; the
//! messaging core absolutizes those when it builds wire payloads.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServerError;

/// Metadata captured at upload time, stored next to the blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentMeta {
    pub mime_type: String,
    pub name: String,
    pub size: i64,
}

/// Disk-backed attachment store.
///
/// File names are built exclusively from generated UUIDs, so user input
/// never reaches the path layer.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    root: PathBuf,
    max_size: usize,
}

impl AttachmentStore {
    pub async fn open(root: &Path, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(root).await.map_err(|e| {
            ServerError::Internal(format!(
                "Failed to create upload directory '{}': {}",
                root.display(),
                e
            ))
        })?;

        info!(path = %root.display(), "Attachment store initialized");

        Ok(Self {
            root: root.to_path_buf(),
            max_size,
        })
    }

    /// Store one uploaded file. Returns the generated id; the public URL
    /// is `/uploads/<id>`.
    pub async fn put(&self, data: &[u8], meta: &AttachmentMeta) -> Result<Uuid, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty attachment".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::TooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let id = Uuid::new_v4();

        fs::write(self.blob_path(id), data)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to write attachment {id}: {e}")))?;

        let sidecar = serde_json::to_vec(meta)
            .map_err(|e| ServerError::Internal(format!("Failed to encode metadata: {e}")))?;
        fs::write(self.meta_path(id), sidecar)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to write metadata for {id}: {e}")))?;

        debug!(id = %id, size = data.len(), mime = %meta.mime_type, "Stored attachment");
        Ok(id)
    }

    /// Fetch a blob and its metadata.
    pub async fn get(&self, id: Uuid) -> Result<(Vec<u8>, AttachmentMeta), ServerError> {
        let path = self.blob_path(id);
        if !path.exists() {
            return Err(ServerError::NotFound(format!("attachment {id}")));
        }

        let data = fs::read(&path)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to read attachment {id}: {e}")))?;

        let meta = match fs::read(self.meta_path(id)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| ServerError::Internal(format!("Corrupt metadata for {id}: {e}")))?,
            // Sidecar lost: serve the bytes as an unnamed binary.
            Err(_) => AttachmentMeta {
                mime_type: "application/octet-stream".to_string(),
                name: id.to_string(),
                size: data.len() as i64,
            },
        };

        debug!(id = %id, size = data.len(), "Retrieved attachment");
        Ok((data, meta))
    }

    fn blob_path(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn meta_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }
}
