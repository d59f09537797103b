use thiserror::Error;

use super::RecordStore;
use crate::normalize::NormalizedRecord;

/// Result of one insert-if-absent attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    /// A record with the same content hash was stored earlier; nothing changed.
    AlreadyPresent,
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Failed to store record {content_hash}: {message}")]
    Store {
        content_hash: String,
        message: String,
    },
}

/// Persists `record` keyed by its content hash, at most once.
pub async fn write_record(
    store: &dyn RecordStore,
    record: &NormalizedRecord,
) -> Result<WriteOutcome, WriteError> {
    match store.insert_if_absent(record).await {
        Ok(true) => {
            tracing::info!(
                hash = %record.content_hash,
                title = %record.title,
                source = %record.source,
                "Stored new record"
            );
            Ok(WriteOutcome::Inserted)
        }
        Ok(false) => {
            tracing::debug!(hash = %record.content_hash, title = %record.title, "Record already present");
            Ok(WriteOutcome::AlreadyPresent)
        }
        Err(e) => Err(WriteError::Store {
            content_hash: record.content_hash.clone(),
            message: format!("{e:#}"),
        }),
    }
}
