use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::normalize::NormalizedRecord;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The database is locked by another process. Wait for it to finish and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classifies a sqlx error, singling out lock contention
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_error(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) messages
pub(crate) fn is_lock_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for `news` queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct NewsDbRow {
    pub content_hash: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: i64,
    pub categories: String,
    pub source: String,
    pub creator: String,
    pub language: String,
    pub last_build_date: i64,
    pub image_url: String,
    pub sub_category: String,
}

impl NewsDbRow {
    pub(crate) fn into_record(self) -> Result<NormalizedRecord> {
        let category: BTreeSet<String> = serde_json::from_str(&self.categories)
            .with_context(|| format!("Invalid categories for {}", self.content_hash))?;

        Ok(NormalizedRecord {
            pub_date: timestamp(self.pub_date)?,
            last_build_date: timestamp(self.last_build_date)?,
            title: self.title,
            link: self.link,
            description: self.description,
            category,
            source: self.source,
            creator: self.creator,
            language: self.language,
            image_url: self.image_url,
            sub_category: self.sub_category,
            content_hash: self.content_hash,
        })
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).with_context(|| format!("Timestamp out of range: {secs}"))
}
