//! File catalog: archives uploads into the storage chat and delivers them back.

use crate::clock::Clock;
use crate::model::{ContentKind, FileHandle, FileRecord, StorageLocation, UserId};
use crate::relay::{ContentRelay, RelayError};
use crate::storage::{RelayStore, StorageError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur while archiving an upload
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Copy into the storage chat failed
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),
    /// Record could not be persisted
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    /// No storage chat configured, uploads cannot be archived
    #[error("No storage chat configured")]
    NoStorageChat,
}

/// An upload as seen by the transport
#[derive(Debug, Clone)]
pub struct IncomingFile {
    /// Display name
    pub file_name: String,
    /// Size in bytes
    pub file_size: u64,
    /// Content kind
    pub kind: ContentKind,
    /// The uploader's message
    pub source: StorageLocation,
    /// Uploader
    pub uploaded_by: UserId,
}

/// Archives and delivers files through a content relay
pub struct FileCatalog {
    store: Arc<dyn RelayStore>,
    relay: Arc<dyn ContentRelay>,
    clock: Arc<dyn Clock>,
    storage_chat: Option<i64>,
}

impl FileCatalog {
    /// Catalog archiving into `storage_chat`. Without one, only delivery works.
    #[must_use]
    pub fn new(
        store: Arc<dyn RelayStore>,
        relay: Arc<dyn ContentRelay>,
        clock: Arc<dyn Clock>,
        storage_chat: Option<i64>,
    ) -> Self {
        Self {
            store,
            relay,
            clock,
            storage_chat,
        }
    }

    /// Copy an upload into the storage chat and record it under a new handle.
    ///
    /// # Errors
    ///
    /// Returns a `CatalogError` if the copy or the record write fails.
    pub async fn archive(&self, upload: IncomingFile) -> Result<FileRecord, CatalogError> {
        let storage_chat = self.storage_chat.ok_or(CatalogError::NoStorageChat)?;
        let message_id = self.relay.relay(upload.source, storage_chat).await?;
        let record = FileRecord {
            handle: FileHandle::generate(),
            file_name: upload.file_name,
            file_size: upload.file_size,
            kind: upload.kind,
            location: StorageLocation {
                chat_id: storage_chat,
                message_id,
            },
            uploaded_by: upload.uploaded_by,
            uploaded_at: self.clock.now(),
        };
        self.store.insert_file(record.clone()).await?;
        info!(
            "Archived {} '{}' from user {} as {}",
            record.kind, record.file_name, record.uploaded_by, record.handle
        );
        Ok(record)
    }

    /// Whether uploads can be archived
    #[must_use]
    pub const fn accepts_uploads(&self) -> bool {
        self.storage_chat.is_some()
    }

    /// Copy a stored file to `chat_id`.
    ///
    /// # Errors
    ///
    /// Returns a `RelayError` if the stored copy cannot be delivered.
    pub async fn deliver(&self, file: &FileRecord, chat_id: i64) -> Result<i32, RelayError> {
        match self.relay.relay(file.location, chat_id).await {
            Ok(message_id) => {
                info!("Delivered file {} to chat {chat_id}", file.handle);
                Ok(message_id)
            }
            Err(e) => {
                warn!("Failed to deliver file {} to chat {chat_id}: {e}", file.handle);
                Err(e)
            }
        }
    }
}
