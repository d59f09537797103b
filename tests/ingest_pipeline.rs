//! End-to-end ingestion runs: wiremock serves the feeds, an in-memory SQLite
//! database is both the source catalog and the record store.
//!
//! Each test starts its own mock server and database for isolation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedmill::feed::{Fetcher, DEFAULT_MAX_FEED_BYTES};
use feedmill::ingest::{
    FeedSource, IngestError, IngestOptions, Ingestor, RecordStore, RunReport, SourceCatalog,
    SourceError,
};
use feedmill::normalize::{content_hash, NormalizedRecord};
use feedmill::storage::Database;

// ============================================================================
// Helpers
// ============================================================================

async fn test_db() -> Arc<Database> {
    Arc::new(Database::open(":memory:").await.unwrap())
}

fn fetcher() -> Fetcher {
    Fetcher::with_client(reqwest::Client::new(), DEFAULT_MAX_FEED_BYTES)
}

fn options(workers: usize, queue: usize) -> IngestOptions {
    IngestOptions {
        worker_count: workers,
        queue_capacity: queue,
        default_language: "tr".to_string(),
    }
}

fn rss(items: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"
     xmlns:media="http://search.yahoo.com/mrss/"
     xmlns:m="http://search.yahoo.com/mrss/"
     xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Test Feed</title>
    <link>https://news.example.com</link>
    <description>Test</description>
    {items}
  </channel>
</rss>"#
    )
}

async fn serve(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("Content-Type", "application/rss+xml"),
        )
        .mount(server)
        .await;
}

fn source(category: &str, topic: &str, urls: Vec<String>) -> FeedSource {
    FeedSource {
        category: category.to_string(),
        topics: BTreeMap::from([(topic.to_string(), urls)]),
    }
}

async fn run(db: &Arc<Database>, options: IngestOptions) -> RunReport {
    Ingestor::new(db.clone(), db.clone(), fetcher(), options)
        .run()
        .await
        .unwrap()
}

async fn stored(db: &Database, title: &str, link: &str) -> Option<NormalizedRecord> {
    db.get_record_by_hash(&content_hash(title, link)).await.unwrap()
}

// ============================================================================
// Single feed
// ============================================================================

#[tokio::test]
async fn test_dateless_entry_is_stored_with_processing_time() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/weather",
        rss(r#"<item>
              <title>Storm warning</title>
              <link>http://example.com/a</link>
              <description>&lt;p&gt;Rain expected&lt;/p&gt;</description>
            </item>"#),
    )
    .await;

    let db = test_db().await;
    let url = format!("{}/weather", server.uri());
    db.upsert_sources(&[source("weather", "alerts", vec![url.clone()])])
        .await
        .unwrap();

    let before = Utc::now().timestamp();
    let report = run(&db, options(2, 4)).await;
    let after = Utc::now().timestamp();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.entries, 1);

    let record = stored(&db, "Storm warning", "http://example.com/a")
        .await
        .expect("record stored");
    assert_eq!(record.link, "http://example.com/a");
    assert_eq!(record.description, "Rain expected");
    assert_eq!(record.image_url, "");
    assert_eq!(record.source, url);
    assert_eq!(record.sub_category, "alerts");
    assert_eq!(record.category.into_iter().collect::<Vec<_>>(), vec!["weather"]);
    assert_eq!(record.language, "tr");
    assert_eq!(
        record.content_hash,
        "77adab8acf5b20bd4f357c54e2bfd34f38ea7353852418ce46d4afa85546d34d"
    );
    let published = record.pub_date.timestamp();
    assert!(before <= published && published <= after);
    assert_eq!(record.pub_date, record.last_build_date);
}

#[tokio::test]
async fn test_guid_used_when_link_is_empty() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/feed",
        rss(r#"<item>
              <title>Guid only</title>
              <link></link>
              <guid isPermaLink="false">http://example.com/b</guid>
            </item>"#),
    )
    .await;

    let db = test_db().await;
    db.upsert_sources(&[source("world", "general", vec![format!("{}/feed", server.uri())])])
        .await
        .unwrap();

    let report = run(&db, options(1, 1)).await;
    assert_eq!(report.inserted, 1);

    let record = stored(&db, "Guid only", "http://example.com/b").await.unwrap();
    assert_eq!(record.link, "http://example.com/b");
}

#[tokio::test]
async fn test_entry_without_link_is_dropped() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/feed",
        rss(r#"<item><title>No link</title><guid>urn:uuid:42</guid></item>
               <item><title>Relative</title><link>/news/relative</link></item>
               <item><title>Kept</title><link>https://example.com/kept</link></item>"#),
    )
    .await;

    let db = test_db().await;
    db.upsert_sources(&[source("world", "general", vec![format!("{}/feed", server.uri())])])
        .await
        .unwrap();

    let report = run(&db, options(2, 2)).await;
    assert_eq!(report.entries, 3);
    assert_eq!(report.dropped, 2);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.write_failures, 0);
    assert_eq!(db.count_records().await.unwrap(), 1);
}

#[tokio::test]
async fn test_namespaced_media_content_beats_thumbnail() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/feed",
        rss(r#"<item>
              <title>Pictured</title>
              <link>https://example.com/pictured</link>
              <media:thumbnail url="https://img.example.com/thumb.jpg"/>
              <m:content url="https://img.example.com/full.jpg" medium="image"/>
            </item>"#),
    )
    .await;

    let db = test_db().await;
    db.upsert_sources(&[source("world", "general", vec![format!("{}/feed", server.uri())])])
        .await
        .unwrap();

    run(&db, options(1, 1)).await;

    let record = stored(&db, "Pictured", "https://example.com/pictured")
        .await
        .unwrap();
    assert_eq!(record.image_url, "https://img.example.com/full.jpg");
}

#[tokio::test]
async fn test_language_from_channel_then_url_suffix() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/news.de",
        rss(r#"<item><title>Suffix</title><link>https://example.com/suffix</link></item>"#),
    )
    .await;
    serve(
        &server,
        "/declared.de",
        rss(r#"<language>en-gb</language>
               <item><title>Declared</title><link>https://example.com/declared</link></item>"#),
    )
    .await;

    let db = test_db().await;
    db.upsert_sources(&[source(
        "world",
        "general",
        vec![
            format!("{}/news.de", server.uri()),
            format!("{}/declared.de", server.uri()),
        ],
    )])
    .await
    .unwrap();

    run(&db, options(2, 2)).await;

    let suffix = stored(&db, "Suffix", "https://example.com/suffix").await.unwrap();
    assert_eq!(suffix.language, "de");
    let declared = stored(&db, "Declared", "https://example.com/declared")
        .await
        .unwrap();
    assert_eq!(declared.language, "en-gb");
}

/// Records titles in the order they are offered.
#[derive(Default)]
struct RecordingStore {
    titles: Mutex<Vec<String>>,
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn insert_if_absent(&self, record: &NormalizedRecord) -> anyhow::Result<bool> {
        self.titles.lock().unwrap().push(record.title.clone());
        Ok(true)
    }
}

#[tokio::test]
async fn test_entries_are_written_in_feed_order() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/feed",
        rss(r#"<item><title>C</title><link>https://example.com/c</link></item>
               <item><title>A</title><link>https://example.com/a</link></item>
               <item><title>B</title><link>https://example.com/b</link></item>"#),
    )
    .await;

    let db = test_db().await;
    db.upsert_sources(&[source("world", "general", vec![format!("{}/feed", server.uri())])])
        .await
        .unwrap();

    let store = Arc::new(RecordingStore::default());
    let report = Ingestor::new(db.clone(), store.clone(), fetcher(), options(1, 1))
        .run()
        .await
        .unwrap();

    assert_eq!(report.inserted, 3);
    assert_eq!(*store.titles.lock().unwrap(), vec!["C", "A", "B"]);
}

// ============================================================================
// Dedup
// ============================================================================

#[tokio::test]
async fn test_same_entry_from_two_urls_is_stored_once() {
    let server = MockServer::start().await;
    let item = r#"<item><title>Shared story</title><link>https://example.com/shared</link></item>"#;
    serve(&server, "/one", rss(item)).await;
    serve(&server, "/two", rss(item)).await;

    let db = test_db().await;
    db.upsert_sources(&[
        source("economy", "markets", vec![format!("{}/one", server.uri())]),
        source("world", "general", vec![format!("{}/two", server.uri())]),
    ])
    .await
    .unwrap();

    let report = run(&db, options(4, 4)).await;

    assert_eq!(report.urls, 2);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.already_present, 1);
    assert_eq!(db.count_records().await.unwrap(), 1);
}

#[tokio::test]
async fn test_second_run_inserts_nothing() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/feed",
        rss(r#"<item><title>A</title><link>https://example.com/a</link></item>
               <item><title>B</title><link>https://example.com/b</link></item>"#),
    )
    .await;

    let db = test_db().await;
    db.upsert_sources(&[source("world", "general", vec![format!("{}/feed", server.uri())])])
        .await
        .unwrap();

    let first = run(&db, options(2, 2)).await;
    assert_eq!(first.inserted, 2);

    let original = stored(&db, "A", "https://example.com/a").await.unwrap();

    let second = run(&db, options(2, 2)).await;
    assert_eq!(second.inserted, 0);
    assert_eq!(second.already_present, 2);
    assert_eq!(db.count_records().await.unwrap(), 2);

    // Insert-only: the stored record keeps its first-run values
    let after = stored(&db, "A", "https://example.com/a").await.unwrap();
    assert_eq!(after, original);
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test]
async fn test_failed_urls_do_not_affect_others() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/good",
        rss(r#"<item><title>Good</title><link>https://example.com/good</link></item>"#),
    )
    .await;
    serve(&server, "/html", "<!DOCTYPE html><html><body>Not a feed</body></html>".to_string()).await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let db = test_db().await;
    db.upsert_sources(&[source(
        "world",
        "general",
        vec![
            format!("{}/missing", server.uri()),
            format!("{}/html", server.uri()),
            format!("{}/good", server.uri()),
            "http://127.0.0.1:1/refused".to_string(),
        ],
    )])
    .await
    .unwrap();

    let report = run(&db, options(2, 1)).await;

    assert_eq!(report.urls, 4);
    assert_eq!(report.fetch_failures, 2);
    assert_eq!(report.parse_failures, 1);
    assert_eq!(report.inserted, 1);
    assert!(stored(&db, "Good", "https://example.com/good").await.is_some());
}

#[tokio::test]
async fn test_small_queue_processes_every_url() {
    let server = MockServer::start().await;
    let mut urls = Vec::new();
    for i in 0..12 {
        let route = format!("/feed{i}");
        serve(
            &server,
            &route,
            rss(&format!(
                "<item><title>Story {i}</title><link>https://example.com/{i}</link></item>"
            )),
        )
        .await;
        urls.push(format!("{}{}", server.uri(), route));
    }

    let db = test_db().await;
    db.upsert_sources(&[source("world", "general", urls)]).await.unwrap();

    let report = run(&db, options(3, 1)).await;
    assert_eq!(report.urls, 12);
    assert_eq!(report.inserted, 12);
    assert_eq!(db.count_records().await.unwrap(), 12);
}

struct PartlyBrokenCatalog {
    url: String,
}

#[async_trait]
impl SourceCatalog for PartlyBrokenCatalog {
    async fn list_sources(&self) -> anyhow::Result<Vec<Result<FeedSource, SourceError>>> {
        Ok(vec![
            Err(SourceError::Malformed {
                category: "broken".to_string(),
                reason: "topics is not an object".to_string(),
            }),
            Ok(source("world", "general", vec![self.url.clone()])),
        ])
    }
}

#[tokio::test]
async fn test_malformed_source_is_skipped() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/feed",
        rss(r#"<item><title>Fine</title><link>https://example.com/fine</link></item>"#),
    )
    .await;

    let db = test_db().await;
    let catalog = Arc::new(PartlyBrokenCatalog {
        url: format!("{}/feed", server.uri()),
    });

    let report = Ingestor::new(catalog, db.clone(), fetcher(), options(2, 2))
        .run()
        .await
        .unwrap();

    assert_eq!(report.sources, 1);
    assert_eq!(report.sources_skipped, 1);
    assert_eq!(report.inserted, 1);
}

struct UnreachableCatalog;

#[async_trait]
impl SourceCatalog for UnreachableCatalog {
    async fn list_sources(&self) -> anyhow::Result<Vec<Result<FeedSource, SourceError>>> {
        anyhow::bail!("catalog offline")
    }
}

#[tokio::test]
async fn test_unreachable_catalog_fails_the_run() {
    let db = test_db().await;
    let result = Ingestor::new(Arc::new(UnreachableCatalog), db, fetcher(), options(2, 2))
        .run()
        .await;

    match result {
        Err(IngestError::Catalog(e)) => assert!(e.to_string().contains("catalog offline")),
        other => panic!("Expected IngestError::Catalog, got {:?}", other),
    }
}

struct RejectingStore;

#[async_trait]
impl RecordStore for RejectingStore {
    async fn insert_if_absent(&self, _record: &NormalizedRecord) -> anyhow::Result<bool> {
        anyhow::bail!("disk full")
    }
}

#[tokio::test]
async fn test_write_failures_are_counted_not_fatal() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/feed",
        rss(r#"<item><title>A</title><link>https://example.com/a</link></item>
               <item><title>B</title><link>https://example.com/b</link></item>"#),
    )
    .await;

    let db = test_db().await;
    db.upsert_sources(&[source("world", "general", vec![format!("{}/feed", server.uri())])])
        .await
        .unwrap();

    let report = Ingestor::new(db.clone(), Arc::new(RejectingStore), fetcher(), options(1, 1))
        .run()
        .await
        .unwrap();

    assert_eq!(report.entries, 2);
    assert_eq!(report.write_failures, 2);
    assert_eq!(report.inserted, 0);
}

struct PanickingStore;

#[async_trait]
impl RecordStore for PanickingStore {
    async fn insert_if_absent(&self, _record: &NormalizedRecord) -> anyhow::Result<bool> {
        panic!("store bug")
    }
}

#[tokio::test]
async fn test_panicking_store_does_not_hang_the_run() {
    let server = MockServer::start().await;
    let mut urls = Vec::new();
    for i in 0..5 {
        let route = format!("/feed{i}");
        serve(
            &server,
            &route,
            rss(&format!(
                "<item><title>Story {i}</title><link>https://example.com/{i}</link></item>"
            )),
        )
        .await;
        urls.push(format!("{}{}", server.uri(), route));
    }

    let db = test_db().await;
    db.upsert_sources(&[source("world", "general", urls)]).await.unwrap();

    let ingestor = Ingestor::new(db.clone(), Arc::new(PanickingStore), fetcher(), options(1, 1));
    let report = tokio::time::timeout(Duration::from_secs(5), ingestor.run())
        .await
        .expect("run finished within 5s")
        .unwrap();

    // The single worker survives each panic and drains the queue
    assert_eq!(report.urls, 5);
    assert_eq!(report.panicked, 5);
    assert_eq!(report.inserted, 0);
}
