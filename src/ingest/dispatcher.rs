use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::writer::{write_record, WriteOutcome};
use super::{FeedSource, RecordStore, SourceCatalog};
use crate::config::Config;
use crate::feed::{parse_feed, Fetcher};
use crate::normalize::{normalize_entry, EntryContext};

// ============================================================================
// Types
// ============================================================================

/// One feed URL to process, with the labels its records inherit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub url: String,
    pub category: String,
    pub topic: String,
}

/// Failures that stop a run before any work is dispatched.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to list feed sources: {0}")]
    Catalog(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub default_language: String,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for IngestOptions {
    fn from(config: &Config) -> Self {
        Self {
            worker_count: config.worker_count,
            queue_capacity: config.queue_capacity,
            default_language: config.default_language.clone(),
        }
    }
}

/// Counters for one ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Sources enumerated from the catalog.
    pub sources: usize,
    /// Sources that could not be enumerated and were skipped.
    pub sources_skipped: usize,
    /// Work items processed.
    pub urls: usize,
    pub fetch_failures: usize,
    pub parse_failures: usize,
    /// Work items whose processing panicked. Their remaining entries are lost.
    pub panicked: usize,
    /// Entries seen across all parsed documents.
    pub entries: usize,
    /// Entries without a usable link.
    pub dropped: usize,
    pub inserted: usize,
    pub already_present: usize,
    pub write_failures: usize,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sources ({} skipped), {} urls ({} fetch failures, {} parse failures, {} panicked), \
             {} entries: {} inserted, {} already present, {} dropped, {} write failures",
            self.sources,
            self.sources_skipped,
            self.urls,
            self.fetch_failures,
            self.parse_failures,
            self.panicked,
            self.entries,
            self.inserted,
            self.already_present,
            self.dropped,
            self.write_failures,
        )
    }
}

/// Shared counters the workers bump concurrently.
#[derive(Debug, Default)]
struct RunStats {
    sources: AtomicUsize,
    sources_skipped: AtomicUsize,
    urls: AtomicUsize,
    fetch_failures: AtomicUsize,
    parse_failures: AtomicUsize,
    panicked: AtomicUsize,
    entries: AtomicUsize,
    dropped: AtomicUsize,
    inserted: AtomicUsize,
    already_present: AtomicUsize,
    write_failures: AtomicUsize,
}

impl RunStats {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RunReport {
        RunReport {
            sources: self.sources.load(Ordering::Relaxed),
            sources_skipped: self.sources_skipped.load(Ordering::Relaxed),
            urls: self.urls.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            entries: self.entries.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            inserted: self.inserted.load(Ordering::Relaxed),
            already_present: self.already_present.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Ingestor
// ============================================================================

/// Runs ingestion passes: enumerates sources, fans the URLs out to a fixed
/// pool of workers over a bounded queue and waits for the pool to drain.
pub struct Ingestor {
    catalog: Arc<dyn SourceCatalog>,
    store: Arc<dyn RecordStore>,
    fetcher: Fetcher,
    options: IngestOptions,
}

/// Per-URL processing shared by the workers of one run.
struct Pipeline {
    store: Arc<dyn RecordStore>,
    fetcher: Fetcher,
    default_language: String,
    stats: RunStats,
}

impl Ingestor {
    pub fn new(
        catalog: Arc<dyn SourceCatalog>,
        store: Arc<dyn RecordStore>,
        fetcher: Fetcher,
        options: IngestOptions,
    ) -> Self {
        Self {
            catalog,
            store,
            fetcher,
            options,
        }
    }

    /// Runs one ingestion pass and returns once every worker has finished.
    ///
    /// Per-URL, per-entry and per-write failures are logged and counted in the
    /// report; they never abort the run.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Catalog`] when the source catalog cannot be read
    /// at all. Nothing is fetched in that case.
    pub async fn run(&self) -> Result<RunReport, IngestError> {
        let sources = self
            .catalog
            .list_sources()
            .await
            .map_err(|e| IngestError::Catalog(e.into()))?;

        let pipeline = Arc::new(Pipeline {
            store: Arc::clone(&self.store),
            fetcher: self.fetcher.clone(),
            default_language: self.options.default_language.clone(),
            stats: RunStats::default(),
        });

        let worker_count = self.options.worker_count.max(1);
        let (tx, rx) = mpsc::channel::<WorkItem>(self.options.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        tracing::info!(
            sources = sources.len(),
            workers = worker_count,
            queue_capacity = self.options.queue_capacity,
            "Starting ingestion run"
        );

        // Workers exist before the first send so none can miss the queue.
        let workers: Vec<JoinHandle<()>> = (0..worker_count)
            .map(|id| tokio::spawn(worker(id, Arc::clone(&rx), Arc::clone(&pipeline))))
            .collect();
        // Only the workers hold the receiver now, so sends fail once they are all gone.
        drop(rx);

        'produce: for source in sources {
            let source = match source {
                Ok(source) => source,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping feed source");
                    RunStats::bump(&pipeline.stats.sources_skipped);
                    continue;
                }
            };
            RunStats::bump(&pipeline.stats.sources);

            for item in work_items(source) {
                // Blocks while the queue is full.
                if tx.send(item).await.is_err() {
                    tracing::error!("All ingestion workers exited, abandoning remaining sources");
                    break 'produce;
                }
            }
        }

        // Closing the queue lets each worker exit once it is drained.
        drop(tx);

        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Ingestion worker panicked");
            }
        }

        let report = pipeline.stats.snapshot();
        tracing::info!(
            urls = report.urls,
            inserted = report.inserted,
            already_present = report.already_present,
            dropped = report.dropped,
            fetch_failures = report.fetch_failures,
            parse_failures = report.parse_failures,
            panicked = report.panicked,
            write_failures = report.write_failures,
            "Ingestion run finished"
        );
        Ok(report)
    }
}

/// Flattens a source into one work item per URL, topic by topic.
pub fn work_items(source: FeedSource) -> impl Iterator<Item = WorkItem> {
    let category = source.category;
    source.topics.into_iter().flat_map(move |(topic, urls)| {
        let category = category.clone();
        urls.into_iter().map(move |url| WorkItem {
            url,
            category: category.clone(),
            topic: topic.clone(),
        })
    })
}

async fn worker(id: usize, queue: Arc<Mutex<mpsc::Receiver<WorkItem>>>, pipeline: Arc<Pipeline>) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(item) = next else {
            break;
        };
        let processed = AssertUnwindSafe(pipeline.process(&item)).catch_unwind().await;
        if processed.is_err() {
            tracing::error!(worker = id, url = %item.url, "Processing feed panicked, moving on");
            RunStats::bump(&pipeline.stats.panicked);
        }
    }
    tracing::debug!(worker = id, "Ingestion worker finished");
}

impl Pipeline {
    /// Fetch, parse, normalize and write every entry of one URL, in order.
    async fn process(&self, item: &WorkItem) {
        RunStats::bump(&self.stats.urls);
        tracing::debug!(url = %item.url, category = %item.category, "Reading feed");

        let bytes = match self.fetcher.fetch(&item.url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(url = %item.url, error = %e, "Failed to fetch feed");
                RunStats::bump(&self.stats.fetch_failures);
                return;
            }
        };

        let document = match parse_feed(&bytes) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(url = %item.url, error = %e, "Failed to parse feed");
                RunStats::bump(&self.stats.parse_failures);
                return;
            }
        };

        // Stored with second precision; truncate so reads round-trip.
        let now = Utc::now().trunc_subsecs(0);
        let ctx = EntryContext {
            source_url: &item.url,
            category: &item.category,
            topic: &item.topic,
            channel_language: document.language.as_deref(),
            default_language: &self.default_language,
            now,
        };

        for entry in &document.items {
            RunStats::bump(&self.stats.entries);

            let Some(record) = normalize_entry(entry, &ctx) else {
                tracing::debug!(url = %item.url, title = %entry.title, "Dropping entry without a usable link");
                RunStats::bump(&self.stats.dropped);
                continue;
            };

            match write_record(self.store.as_ref(), &record).await {
                Ok(WriteOutcome::Inserted) => RunStats::bump(&self.stats.inserted),
                Ok(WriteOutcome::AlreadyPresent) => RunStats::bump(&self.stats.already_present),
                Err(e) => {
                    tracing::warn!(url = %item.url, error = %e, "Failed to store record");
                    RunStats::bump(&self.stats.write_failures);
                }
            }
        }
    }
}
