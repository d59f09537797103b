use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum source list document size (1MB)
const MAX_DOCUMENT_SIZE: u64 = 1024 * 1024;

/// A category and the feed URLs listed under each of its topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    pub category: String,
    pub topics: BTreeMap<String, Vec<String>>,
}

impl FeedSource {
    /// Total URLs across all topics, duplicates included.
    pub fn url_count(&self) -> usize {
        self.topics.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to read source list {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Source list too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("Invalid source list: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored source record that cannot be turned back into a [`FeedSource`].
    #[error("Malformed source record for category '{category}': {reason}")]
    Malformed { category: String, reason: String },
}

/// Reads a `{category: {topic: [url, ...]}}` JSON document from disk.
pub fn read_document(path: &Path) -> Result<Vec<FeedSource>, SourceError> {
    let io_err = |source| SourceError::Io {
        path: path.display().to_string(),
        source,
    };

    let size = std::fs::metadata(path).map_err(io_err)?.len();
    if size > MAX_DOCUMENT_SIZE {
        return Err(SourceError::TooLarge {
            size,
            max: MAX_DOCUMENT_SIZE,
        });
    }

    let content = std::fs::read_to_string(path).map_err(io_err)?;
    parse_document(&content)
}

/// Parses a source list document. Categories come back sorted by name.
pub fn parse_document(content: &str) -> Result<Vec<FeedSource>, SourceError> {
    let document: BTreeMap<String, BTreeMap<String, Vec<String>>> =
        serde_json::from_str(content)?;

    Ok(document
        .into_iter()
        .map(|(category, topics)| FeedSource { category, topics })
        .collect())
}
