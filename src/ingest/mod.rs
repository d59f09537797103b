//! The ingestion pipeline.
//!
//! A run lists the configured sources, turns every URL into a [`WorkItem`]
//! and pushes it through a bounded queue to a fixed pool of workers. Each
//! worker fetches, parses and normalizes one URL at a time and hands the
//! records to the writer, which stores each content hash at most once.
//!
//! Storage is reached through [`RecordStore`] and [`SourceCatalog`] so the
//! pipeline can be driven against something other than SQLite in tests.

mod dispatcher;
mod sources;
mod writer;

use async_trait::async_trait;

use crate::normalize::NormalizedRecord;
use crate::storage::Database;

pub use dispatcher::{work_items, IngestError, IngestOptions, Ingestor, RunReport, WorkItem};
pub use sources::{parse_document, read_document, FeedSource, SourceError};
pub use writer::{write_record, WriteError, WriteOutcome};

/// Insert-if-absent persistence keyed by the record's content hash.
///
/// Implementations must make the check and the insert a single atomic step:
/// concurrent calls with the same hash store exactly one record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns `true` if the record was stored, `false` if its hash was
    /// already present.
    async fn insert_if_absent(&self, record: &NormalizedRecord) -> anyhow::Result<bool>;
}

/// Read access to the configured feed sources.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// The outer error means the catalog is unreachable; an inner error is
    /// one source that cannot be enumerated.
    async fn list_sources(&self) -> anyhow::Result<Vec<Result<FeedSource, SourceError>>>;
}

#[async_trait]
impl RecordStore for Database {
    async fn insert_if_absent(&self, record: &NormalizedRecord) -> anyhow::Result<bool> {
        Database::insert_if_absent(self, record).await
    }
}

#[async_trait]
impl SourceCatalog for Database {
    async fn list_sources(&self) -> anyhow::Result<Vec<Result<FeedSource, SourceError>>> {
        Database::list_sources(self).await
    }
}
