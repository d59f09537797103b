//! Entry normalization.
//!
//! Pure functions that turn one raw [`FeedEntry`] into a [`NormalizedRecord`]:
//! canonical link, publish timestamp, plain-text body, image URL, language and
//! the content hash used as the dedup key. Nothing in here performs I/O.

mod date;
mod image;
mod text;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::feed::FeedEntry;

pub use date::{parse_pub_date, publish_date};
pub use image::resolve_image;
pub use text::html_to_text;

// ============================================================================
// Record
// ============================================================================

/// The canonical, persisted shape of a feed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecord {
    pub title: String,
    pub link: String,
    /// Plain text, markup stripped.
    pub description: String,
    pub pub_date: DateTime<Utc>,
    pub category: BTreeSet<String>,
    /// Feed URL the entry was fetched from.
    pub source: String,
    pub creator: String,
    pub language: String,
    /// Processing timestamp of the fetch that produced this record.
    pub last_build_date: DateTime<Utc>,
    pub image_url: String,
    /// Topic label the source URL was listed under.
    pub sub_category: String,
    /// Lowercase hex SHA-256 of `title + link`.
    pub content_hash: String,
}

/// Per-URL values every entry of one document shares.
#[derive(Debug, Clone)]
pub struct EntryContext<'a> {
    pub source_url: &'a str,
    pub category: &'a str,
    pub topic: &'a str,
    /// Channel-level `<language>`, when the feed declares one.
    pub channel_language: Option<&'a str>,
    pub default_language: &'a str,
    pub now: DateTime<Utc>,
}

/// Normalizes one entry.
///
/// Returns `None` when the entry has no usable link. Such entries are dropped
/// without being treated as an error.
pub fn normalize_entry(entry: &FeedEntry, ctx: &EntryContext<'_>) -> Option<NormalizedRecord> {
    let link = canonical_link(entry)?;

    let title = entry.title.trim().to_string();
    let body_source = if entry.description.trim().is_empty() {
        entry.content_encoded.as_deref().unwrap_or_default()
    } else {
        entry.description.as_str()
    };

    let category = std::iter::once(ctx.category)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect();

    Some(NormalizedRecord {
        content_hash: content_hash(&title, &link),
        description: html_to_text(body_source),
        pub_date: publish_date(entry.pub_date.as_deref(), ctx.now),
        category,
        source: ctx.source_url.to_string(),
        creator: entry.creator.clone().unwrap_or_default(),
        language: record_language(ctx.channel_language, ctx.source_url, ctx.default_language),
        last_build_date: ctx.now,
        image_url: resolve_image(entry),
        sub_category: ctx.topic.to_string(),
        title,
        link,
    })
}

// ============================================================================
// Field rules
// ============================================================================

/// Prefix check only; no URL grammar validation.
pub fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("http://") || value.starts_with("https://")
}

/// First valid candidate among the plain link, the Atom `link href`, a
/// non-permalink guid and the item's Atom `link` attribute.
pub fn canonical_link(entry: &FeedEntry) -> Option<String> {
    let guid = entry
        .guid
        .as_ref()
        .filter(|guid| !guid.is_permalink)
        .map(|guid| guid.value.as_str());

    [
        entry.link.as_deref(),
        entry.atom_link_href.as_deref(),
        guid,
        entry.atom_link.as_deref(),
    ]
    .into_iter()
    .flatten()
    .find(|candidate| is_http_url(candidate))
    .map(|link| link.trim().to_string())
}

/// Channel language if declared, else the source URL's trailing dot suffix.
pub fn record_language(channel: Option<&str>, source_url: &str, default: &str) -> String {
    match channel.map(str::trim).filter(|lang| !lang.is_empty()) {
        Some(lang) => lang.to_string(),
        None => infer_language(source_url, default),
    }
}

/// Takes the word characters after the last `.` of the URL, e.g.
/// `https://example.com/feed.tr` gives `tr`.
///
/// A URL ending in `.xml` yields `xml`; the heuristic does not know file
/// extensions from locales.
pub fn infer_language(source_url: &str, default: &str) -> String {
    source_url
        .rsplit_once('.')
        .map(|(_, suffix)| suffix)
        .filter(|suffix| {
            !suffix.is_empty() && suffix.chars().all(|c| c.is_alphanumeric() || c == '_')
        })
        .unwrap_or(default)
        .to_string()
}

/// Dedup key: lowercase hex SHA-256 of `title` immediately followed by `link`.
pub fn content_hash(title: &str, link: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(link.as_bytes());
    format!("{:x}", hasher.finalize())
}
