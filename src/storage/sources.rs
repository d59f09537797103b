use std::collections::BTreeMap;

use anyhow::Result;

use super::schema::Database;
use crate::ingest::{FeedSource, SourceError};

impl Database {
    // ========================================================================
    // Feed Source Operations
    // ========================================================================

    /// Inserts or replaces the topic map of each category.
    ///
    /// Categories missing from `sources` are left untouched. Returns the
    /// number of categories written.
    pub async fn upsert_sources(&self, sources: &[FeedSource]) -> Result<usize> {
        if sources.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for source in sources {
            let topics = serde_json::to_string(&source.topics)?;
            sqlx::query(
                r#"
                INSERT INTO feed_sources (category, topics, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(category) DO UPDATE SET topics = excluded.topics, updated_at = excluded.updated_at
            "#,
            )
            .bind(&source.category)
            .bind(&topics)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(sources.len())
    }

    /// Lists every stored source, ordered by category.
    ///
    /// A row whose topic map does not decode comes back as
    /// [`SourceError::Malformed`] in place; the remaining rows are unaffected.
    pub async fn list_sources(&self) -> Result<Vec<Result<FeedSource, SourceError>>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT category, topics FROM feed_sources ORDER BY category")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(category, topics)| {
                match serde_json::from_str::<BTreeMap<String, Vec<String>>>(&topics) {
                    Ok(topics) => Ok(FeedSource { category, topics }),
                    Err(e) => Err(SourceError::Malformed {
                        category,
                        reason: e.to_string(),
                    }),
                }
            })
            .collect())
    }
}
