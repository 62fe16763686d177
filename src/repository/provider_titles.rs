//! Repository for the `provider_titles` collection.

use crate::error::AppResult;
use crate::model::{ContentType, ProviderTitle};
use crate::repository::{batches, BulkSaveResult, Store, DEFAULT_BATCH_SIZE};
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashSet;

#[derive(Clone)]
pub struct ProviderTitleRepository {
    store: Store,
}

impl ProviderTitleRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn find_by_provider_and_type(
        &self,
        provider_id: &str,
        content_type: ContentType,
    ) -> AppResult<Vec<ProviderTitle>> {
        if self.store.is_stopping() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT * FROM provider_titles WHERE provider_id = ? AND content_type = ?",
        )
        .bind(provider_id)
        .bind(content_type.as_str())
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows.iter().map(row_to_provider_title).collect())
    }

    /// Bulk-save for (provider_id, title_key) compound keys, same algorithm
    /// shape as [`crate::repository::titles::TitleRepository::bulk_save`].
    pub async fn bulk_save(&self, rows: &[ProviderTitle]) -> AppResult<BulkSaveResult> {
        if self.store.is_stopping() {
            return Ok(BulkSaveResult::default());
        }
        let rows: Vec<&ProviderTitle> = rows
            .iter()
            .filter(|row| row.document_key().is_some())
            .collect();
        if rows.is_empty() {
            return Ok(BulkSaveResult::default());
        }

        let keys: Vec<(String, String)> = rows
            .iter()
            .map(|row| (row.provider_id.clone(), row.title_key.clone()))
            .collect();
        let mut existing: HashSet<(String, String)> = HashSet::new();
        for batch in batches(&keys, DEFAULT_BATCH_SIZE) {
            let clauses = std::iter::repeat("(provider_id = ? AND title_key = ?)")
                .take(batch.len())
                .collect::<Vec<_>>()
                .join(" OR ");
            let query = format!("SELECT provider_id, title_key FROM provider_titles WHERE {clauses}");
            let mut q = sqlx::query(&query);
            for (provider_id, title_key) in &batch {
                q = q.bind(provider_id).bind(title_key);
            }
            let found = q.fetch_all(self.store.pool()).await?;
            for row in found {
                existing.insert((row.get("provider_id"), row.get("title_key")));
            }
        }

        let now = Utc::now();
        let mut inserted = 0u64;
        let mut updated = 0u64;

        for row in rows {
            let key = (row.provider_id.clone(), row.title_key.clone());
            if existing.contains(&key) {
                sqlx::query(
                    r#"
                    UPDATE provider_titles SET
                        title_id = ?, content_type = ?, tmdb_id = ?, category_id = ?,
                        release_date = ?, ignored = ?, ignored_reason = ?, last_updated = ?
                    WHERE provider_id = ? AND title_key = ?
                    "#,
                )
                .bind(&row.title_id)
                .bind(row.content_type.as_str())
                .bind(&row.tmdb_id)
                .bind(&row.category_id)
                .bind(&row.release_date)
                .bind(row.ignored)
                .bind(&row.ignored_reason)
                .bind(now.to_rfc3339())
                .bind(&row.provider_id)
                .bind(&row.title_key)
                .execute(self.store.pool())
                .await?;
                updated += 1;
            } else {
                let result = sqlx::query(
                    r#"
                    INSERT INTO provider_titles (
                        provider_id, title_key, title_id, content_type, tmdb_id, category_id,
                        release_date, ignored, ignored_reason, last_updated
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(provider_id, title_key) DO NOTHING
                    "#,
                )
                .bind(&row.provider_id)
                .bind(&row.title_key)
                .bind(&row.title_id)
                .bind(row.content_type.as_str())
                .bind(&row.tmdb_id)
                .bind(&row.category_id)
                .bind(&row.release_date)
                .bind(row.ignored)
                .bind(&row.ignored_reason)
                .bind(now.to_rfc3339())
                .execute(self.store.pool())
                .await?;
                if result.rows_affected() > 0 {
                    inserted += 1;
                } else {
                    updated += 1;
                }
            }
        }

        Ok(BulkSaveResult { inserted, updated })
    }

    /// Removes any `(provider_id, type)` row whose `title_key` was not seen
    /// in the current ingestion run (`seen_title_keys`), then returns how
    /// many were pruned. Called after all batches for that provider/type
    /// complete (§4.6 step f).
    pub async fn prune_missing(
        &self,
        provider_id: &str,
        content_type: ContentType,
        seen_title_keys: &HashSet<String>,
    ) -> AppResult<u64> {
        if self.store.is_stopping() {
            return Ok(0);
        }
        let existing = self.find_by_provider_and_type(provider_id, content_type).await?;
        let to_remove: Vec<String> = existing
            .into_iter()
            .filter(|row| !seen_title_keys.contains(&row.title_key))
            .map(|row| row.title_key)
            .collect();

        let mut removed = 0u64;
        for batch in batches(&to_remove, DEFAULT_BATCH_SIZE) {
            let placeholders = std::iter::repeat("?").take(batch.len()).collect::<Vec<_>>().join(",");
            let query = format!(
                "DELETE FROM provider_titles WHERE provider_id = ? AND title_key IN ({placeholders})"
            );
            let mut q = sqlx::query(&query).bind(provider_id);
            for key in &batch {
                q = q.bind(key);
            }
            let result = q.execute(self.store.pool()).await?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }
}

fn row_to_provider_title(row: &sqlx::sqlite::SqliteRow) -> ProviderTitle {
    let content_type: String = row.get("content_type");
    let last_updated: String = row.get("last_updated");
    ProviderTitle {
        provider_id: row.get("provider_id"),
        title_key: row.get("title_key"),
        title_id: row.get("title_id"),
        content_type: content_type.parse().unwrap_or(ContentType::Movies),
        tmdb_id: row.get("tmdb_id"),
        category_id: row.get("category_id"),
        release_date: row.get("release_date"),
        ignored: row.get("ignored"),
        ignored_reason: row.get("ignored_reason"),
        last_updated: DateTime::parse_from_rfc3339(&last_updated)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(provider_id: &str, title_key: &str) -> ProviderTitle {
        ProviderTitle {
            provider_id: provider_id.to_string(),
            title_key: title_key.to_string(),
            title_id: "101".to_string(),
            content_type: ContentType::Movies,
            tmdb_id: Some("101".to_string()),
            category_id: None,
            release_date: None,
            ignored: false,
            ignored_reason: None,
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn prune_removes_rows_missing_from_the_seen_set() {
        let store = Store::connect_test().await.unwrap();
        let repo = ProviderTitleRepository::new(store);
        repo.bulk_save(&[sample("p1", "movies-1"), sample("p1", "movies-2")])
            .await
            .unwrap();

        let mut seen = HashSet::new();
        seen.insert("movies-1".to_string());
        let removed = repo
            .prune_missing("p1", ContentType::Movies, &seen)
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let remaining = repo
            .find_by_provider_and_type("p1", ContentType::Movies)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].title_key, "movies-1");
    }
}
