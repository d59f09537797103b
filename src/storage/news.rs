use anyhow::Result;

use super::schema::Database;
use super::types::NewsDbRow;
use crate::normalize::NormalizedRecord;

impl Database {
    // ========================================================================
    // News Operations
    // ========================================================================

    /// Stores `record` unless a record with the same content hash exists.
    ///
    /// Returns `true` when a row was inserted, `false` when the hash was
    /// already present. An existing row is never modified. The check and the
    /// insert are one statement guarded by the UNIQUE constraint, so two
    /// writers racing on the same hash produce exactly one row.
    pub async fn insert_if_absent(&self, record: &NormalizedRecord) -> Result<bool> {
        let categories = serde_json::to_string(&record.category)?;

        let result = sqlx::query(
            r#"
            INSERT INTO news (
                content_hash, title, link, description, pub_date, categories, source,
                creator, language, last_build_date, image_url, sub_category
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(content_hash) DO NOTHING
        "#,
        )
        .bind(&record.content_hash)
        .bind(&record.title)
        .bind(&record.link)
        .bind(&record.description)
        .bind(record.pub_date.timestamp())
        .bind(&categories)
        .bind(&record.source)
        .bind(&record.creator)
        .bind(&record.language)
        .bind(record.last_build_date.timestamp())
        .bind(&record.image_url)
        .bind(&record.sub_category)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ========================================================================
    // News Queries
    // ========================================================================

    /// Looks up a stored record by its content hash.
    pub async fn get_record_by_hash(&self, content_hash: &str) -> Result<Option<NormalizedRecord>> {
        let row: Option<NewsDbRow> = sqlx::query_as(
            r#"
            SELECT content_hash, title, link, description, pub_date, categories, source,
                   creator, language, last_build_date, image_url, sub_category
            FROM news WHERE content_hash = ?
        "#,
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(NewsDbRow::into_record).transpose()
    }

    pub async fn count_records(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM news")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
