//! Repository for the canonical `titles` collection.

use crate::error::AppResult;
use crate::model::{ContentType, EpisodeDescriptor, Title};
use crate::repository::{batches, BulkSaveResult, Store, DEFAULT_BATCH_SIZE};
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::{HashMap, HashSet};

#[derive(Clone)]
pub struct TitleRepository {
    store: Store,
}

impl TitleRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn find_by_key(&self, title_key: &str) -> AppResult<Option<Title>> {
        if self.store.is_stopping() {
            return Ok(None);
        }
        let row = sqlx::query("SELECT * FROM titles WHERE title_key = ?")
            .bind(title_key)
            .fetch_optional(self.store.pool())
            .await?;
        Ok(row.map(|row| row_to_title(&row)))
    }

    /// Implements the bulk-save algorithm from §4.5: batch existence checks,
    /// partition into insert/update, execute both unordered, and return
    /// counts. A title whose key is falsy is dropped silently.
    pub async fn bulk_save(&self, titles: &[Title]) -> AppResult<BulkSaveResult> {
        if self.store.is_stopping() {
            return Ok(BulkSaveResult::default());
        }
        let titles: Vec<&Title> = titles
            .iter()
            .filter(|title| title.document_key().is_some())
            .collect();
        if titles.is_empty() {
            return Ok(BulkSaveResult::default());
        }

        let keys: Vec<String> = titles.iter().map(|title| title.title_key.clone()).collect();
        let mut existing: HashSet<String> = HashSet::new();
        for batch in batches(&keys, DEFAULT_BATCH_SIZE) {
            let placeholders = std::iter::repeat("?")
                .take(batch.len())
                .collect::<Vec<_>>()
                .join(",");
            let query = format!("SELECT title_key FROM titles WHERE title_key IN ({placeholders})");
            let mut q = sqlx::query(&query);
            for key in &batch {
                q = q.bind(key);
            }
            let rows = q.fetch_all(self.store.pool()).await?;
            for row in rows {
                existing.insert(row.get::<String, _>("title_key"));
            }
        }

        let now = Utc::now();
        let mut inserted = 0u64;
        let mut updated = 0u64;

        for title in titles {
            let is_update = existing.contains(&title.title_key);
            let genres = serde_json::to_string(&title.genres)?;
            let streams = serde_json::to_string(&title.streams)?;

            if is_update {
                sqlx::query(
                    r#"
                    UPDATE titles SET
                        title_id = ?, content_type = ?, title = ?, release_date = ?,
                        overview = ?, vote_average = ?, genres = ?, runtime = ?,
                        poster_path = ?, backdrop_path = ?, imdb_id = ?, streams = ?,
                        last_updated = ?
                    WHERE title_key = ?
                    "#,
                )
                .bind(&title.title_id)
                .bind(title.content_type.as_str())
                .bind(&title.title)
                .bind(&title.release_date)
                .bind(&title.overview)
                .bind(title.vote_average)
                .bind(&genres)
                .bind(title.runtime)
                .bind(&title.poster_path)
                .bind(&title.backdrop_path)
                .bind(&title.imdb_id)
                .bind(&streams)
                .bind(now.to_rfc3339())
                .bind(&title.title_key)
                .execute(self.store.pool())
                .await?;
                updated += 1;
            } else {
                let result = sqlx::query(
                    r#"
                    INSERT INTO titles (
                        title_key, title_id, content_type, title, release_date, overview,
                        vote_average, genres, runtime, poster_path, backdrop_path, imdb_id,
                        streams, created_at, last_updated
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(title_key) DO NOTHING
                    "#,
                )
                .bind(&title.title_key)
                .bind(&title.title_id)
                .bind(title.content_type.as_str())
                .bind(&title.title)
                .bind(&title.release_date)
                .bind(&title.overview)
                .bind(title.vote_average)
                .bind(&genres)
                .bind(title.runtime)
                .bind(&title.poster_path)
                .bind(&title.backdrop_path)
                .bind(&title.imdb_id)
                .bind(&streams)
                .bind(now.to_rfc3339())
                .bind(now.to_rfc3339())
                .execute(self.store.pool())
                .await?;
                // A concurrent rerun can race us between the existence check
                // and this insert; the ON CONFLICT DO NOTHING makes that
                // idempotent rather than a hard error (§4.5 invariant).
                if result.rows_affected() > 0 {
                    inserted += 1;
                } else {
                    updated += 1;
                }
            }
        }

        Ok(BulkSaveResult { inserted, updated })
    }

    /// Deletes titles with no remaining `title_streams` row anywhere —
    /// orphans left behind once the last provider referencing them prunes
    /// its `provider_titles`/`title_streams` rows.
    pub async fn delete_orphans(&self) -> AppResult<u64> {
        if self.store.is_stopping() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            DELETE FROM titles
            WHERE NOT EXISTS (
                SELECT 1 FROM title_streams WHERE title_streams.title_key = titles.title_key
            )
            "#,
        )
        .execute(self.store.pool())
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_by_type(&self, content_type: ContentType) -> AppResult<i64> {
        if self.store.is_stopping() {
            return Ok(0);
        }
        let row = sqlx::query("SELECT COUNT(*) as count FROM titles WHERE content_type = ?")
            .bind(content_type.as_str())
            .fetch_one(self.store.pool())
            .await?;
        Ok(row.get("count"))
    }
}

fn row_to_title(row: &sqlx::sqlite::SqliteRow) -> Title {
    let content_type: String = row.get("content_type");
    let genres: String = row.get("genres");
    let streams: String = row.get("streams");
    let created_at: String = row.get("created_at");
    let last_updated: String = row.get("last_updated");

    Title {
        title_key: row.get("title_key"),
        title_id: row.get("title_id"),
        content_type: content_type.parse().unwrap_or(ContentType::Movies),
        title: row.get("title"),
        release_date: row.get("release_date"),
        overview: row.get("overview"),
        vote_average: row.get("vote_average"),
        genres: serde_json::from_str(&genres).unwrap_or_default(),
        runtime: row.get("runtime"),
        poster_path: row.get("poster_path"),
        backdrop_path: row.get("backdrop_path"),
        imdb_id: row.get("imdb_id"),
        streams: serde_json::from_str::<HashMap<String, EpisodeDescriptor>>(&streams)
            .unwrap_or_default(),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        last_updated: DateTime::parse_from_rfc3339(&last_updated)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_title(key: &str, tmdb_id: &str) -> Title {
        let now = Utc::now();
        Title {
            title_key: key.to_string(),
            title_id: tmdb_id.to_string(),
            content_type: ContentType::Movies,
            title: "Example".to_string(),
            release_date: Some("2020-01-01".to_string()),
            overview: None,
            vote_average: Some(7.5),
            genres: vec!["Drama".to_string()],
            runtime: Some(120),
            poster_path: None,
            backdrop_path: None,
            imdb_id: None,
            streams: HashMap::new(),
            created_at: now,
            last_updated: now,
        }
    }

    #[tokio::test]
    async fn bulk_save_partitions_insert_and_update() {
        let store = Store::connect_test().await.unwrap();
        let repo = TitleRepository::new(store);

        let first_pass = repo.bulk_save(&[sample_title("movies-1", "1")]).await.unwrap();
        assert_eq!(first_pass, BulkSaveResult { inserted: 1, updated: 0 });

        let second_pass = repo
            .bulk_save(&[sample_title("movies-1", "1"), sample_title("movies-2", "2")])
            .await
            .unwrap();
        assert_eq!(second_pass, BulkSaveResult { inserted: 1, updated: 1 });
    }

    #[tokio::test]
    async fn bulk_save_is_idempotent() {
        let store = Store::connect_test().await.unwrap();
        let repo = TitleRepository::new(store);
        let batch = vec![sample_title("movies-1", "1"), sample_title("movies-2", "2")];

        repo.bulk_save(&batch).await.unwrap();
        let second = repo.bulk_save(&batch).await.unwrap();
        assert_eq!(second, BulkSaveResult { inserted: 0, updated: 2 });
    }

    #[tokio::test]
    async fn orphan_titles_are_deleted() {
        let store = Store::connect_test().await.unwrap();
        let repo = TitleRepository::new(store);
        repo.bulk_save(&[sample_title("movies-1", "1")]).await.unwrap();

        let deleted = repo.delete_orphans().await.unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.find_by_key("movies-1").await.unwrap().is_none());
    }
}
