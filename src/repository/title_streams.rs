//! Repository for the `title_streams` collection — the playable-URL rows.

use crate::error::AppResult;
use crate::model::TitleStream;
use crate::repository::{batches, BulkSaveResult, Store, DEFAULT_BATCH_SIZE};
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashSet;

#[derive(Clone)]
pub struct TitleStreamRepository {
    store: Store,
}

impl TitleStreamRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Ordering matches §5: candidates for resolution are returned in
    /// repository insertion order, which callers combine with provider
    /// priority for final probe order.
    pub async fn find_for_title_and_stream(
        &self,
        title_key: &str,
        stream_id: &str,
    ) -> AppResult<Vec<TitleStream>> {
        if self.store.is_stopping() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT * FROM title_streams WHERE title_key = ? AND stream_id = ? ORDER BY rowid",
        )
        .bind(title_key)
        .bind(stream_id)
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows.iter().map(row_to_title_stream).collect())
    }

    pub async fn bulk_save(&self, rows: &[TitleStream]) -> AppResult<BulkSaveResult> {
        if self.store.is_stopping() {
            return Ok(BulkSaveResult::default());
        }
        let rows: Vec<&TitleStream> = rows
            .iter()
            .filter(|row| row.document_key().is_some())
            .collect();
        if rows.is_empty() {
            return Ok(BulkSaveResult::default());
        }

        let keys: Vec<(String, String, String)> = rows
            .iter()
            .map(|row| (row.title_key.clone(), row.stream_id.clone(), row.provider_id.clone()))
            .collect();
        let mut existing: HashSet<(String, String, String)> = HashSet::new();
        for batch in batches(&keys, DEFAULT_BATCH_SIZE) {
            let clauses = std::iter::repeat("(title_key = ? AND stream_id = ? AND provider_id = ?)")
                .take(batch.len())
                .collect::<Vec<_>>()
                .join(" OR ");
            let query = format!("SELECT title_key, stream_id, provider_id FROM title_streams WHERE {clauses}");
            let mut q = sqlx::query(&query);
            for (title_key, stream_id, provider_id) in &batch {
                q = q.bind(title_key).bind(stream_id).bind(provider_id);
            }
            let found = q.fetch_all(self.store.pool()).await?;
            for row in found {
                existing.insert((
                    row.get("title_key"),
                    row.get("stream_id"),
                    row.get("provider_id"),
                ));
            }
        }

        let now = Utc::now();
        let mut inserted = 0u64;
        let mut updated = 0u64;

        for row in rows {
            let key = (row.title_key.clone(), row.stream_id.clone(), row.provider_id.clone());
            if existing.contains(&key) {
                sqlx::query(
                    "UPDATE title_streams SET proxy_url = ?, last_updated = ? WHERE title_key = ? AND stream_id = ? AND provider_id = ?",
                )
                .bind(&row.proxy_url)
                .bind(now.to_rfc3339())
                .bind(&row.title_key)
                .bind(&row.stream_id)
                .bind(&row.provider_id)
                .execute(self.store.pool())
                .await?;
                updated += 1;
            } else {
                let result = sqlx::query(
                    r#"
                    INSERT INTO title_streams (title_key, stream_id, provider_id, proxy_url, last_updated)
                    VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT(title_key, stream_id, provider_id) DO NOTHING
                    "#,
                )
                .bind(&row.title_key)
                .bind(&row.stream_id)
                .bind(&row.provider_id)
                .bind(&row.proxy_url)
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

    /// Removes rows for `(provider_id, title_key)` whose `stream_id` is not
    /// in `seen_stream_ids` — the per-title/per-provider episode diff.
    pub async fn prune_missing_streams(
        &self,
        provider_id: &str,
        title_key: &str,
        seen_stream_ids: &HashSet<String>,
    ) -> AppResult<u64> {
        if self.store.is_stopping() {
            return Ok(0);
        }
        let rows = sqlx::query(
            "SELECT stream_id FROM title_streams WHERE provider_id = ? AND title_key = ?",
        )
        .bind(provider_id)
        .bind(title_key)
        .fetch_all(self.store.pool())
        .await?;
        let to_remove: Vec<String> = rows
            .into_iter()
            .map(|row| row.get::<String, _>("stream_id"))
            .filter(|stream_id| !seen_stream_ids.contains(stream_id))
            .collect();

        let mut removed = 0u64;
        for batch in batches(&to_remove, DEFAULT_BATCH_SIZE) {
            let placeholders = std::iter::repeat("?").take(batch.len()).collect::<Vec<_>>().join(",");
            let query = format!(
                "DELETE FROM title_streams WHERE provider_id = ? AND title_key = ? AND stream_id IN ({placeholders})"
            );
            let mut q = sqlx::query(&query).bind(provider_id).bind(title_key);
            for stream_id in &batch {
                q = q.bind(stream_id);
            }
            let result = q.execute(self.store.pool()).await?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }

    /// Current stream-id set for `(provider_id, title_key)` — used by the
    /// AGTV skip policy, which treats a show as unchanged iff this set
    /// matches the newly fetched one.
    pub async fn stream_ids_for_provider_and_title(
        &self,
        provider_id: &str,
        title_key: &str,
    ) -> AppResult<HashSet<String>> {
        if self.store.is_stopping() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query(
            "SELECT stream_id FROM title_streams WHERE provider_id = ? AND title_key = ?",
        )
        .bind(provider_id)
        .bind(title_key)
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows.into_iter().map(|row| row.get::<String, _>("stream_id")).collect())
    }

    pub async fn delete_for_provider_and_title(&self, provider_id: &str, title_key: &str) -> AppResult<u64> {
        if self.store.is_stopping() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM title_streams WHERE provider_id = ? AND title_key = ?")
            .bind(provider_id)
            .bind(title_key)
            .execute(self.store.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_title_stream(row: &sqlx::sqlite::SqliteRow) -> TitleStream {
    let last_updated: String = row.get("last_updated");
    TitleStream {
        title_key: row.get("title_key"),
        stream_id: row.get("stream_id"),
        provider_id: row.get("provider_id"),
        proxy_url: row.get("proxy_url"),
        last_updated: DateTime::parse_from_rfc3339(&last_updated)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(title_key: &str, stream_id: &str, provider_id: &str, url: &str) -> TitleStream {
        TitleStream {
            title_key: title_key.to_string(),
            stream_id: stream_id.to_string(),
            provider_id: provider_id.to_string(),
            proxy_url: url.to_string(),
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn find_returns_rows_for_title_and_stream() {
        let store = Store::connect_test().await.unwrap();
        let repo = TitleStreamRepository::new(store);
        repo.bulk_save(&[
            sample("tvshows-55", "S02-E03", "a", "/s/55/2/3.mp4"),
            sample("tvshows-55", "S02-E03", "b", "/s/55/2/3.mp4"),
        ])
        .await
        .unwrap();

        let rows = repo
            .find_for_title_and_stream("tvshows-55", "S02-E03")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn prune_missing_streams_drops_stale_episodes() {
        let store = Store::connect_test().await.unwrap();
        let repo = TitleStreamRepository::new(store);
        repo.bulk_save(&[
            sample("tvshows-55", "S01-E01", "a", "/1.mp4"),
            sample("tvshows-55", "S01-E02", "a", "/2.mp4"),
        ])
        .await
        .unwrap();

        let mut seen = HashSet::new();
        seen.insert("S01-E01".to_string());
        let removed = repo
            .prune_missing_streams("a", "tvshows-55", &seen)
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }
}
