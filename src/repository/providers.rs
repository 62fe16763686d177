//! Repository for provider configuration (external write surface; the
//! settings CRUD layer that manages these rows is out of scope, but the
//! ingestion/resolver/rate-limiter subsystems all read through here).

use crate::error::AppResult;
use crate::model::{ApiRate, Provider, ProviderType};
use crate::repository::Store;
use sqlx::Row;

#[derive(Clone)]
pub struct ProviderRepository {
    store: Store,
}

impl ProviderRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Undeleted providers ordered by ascending priority, the ordering
    /// authority for both ingestion run order and resolver candidates.
    pub async fn list_enabled_ordered_by_priority(&self) -> AppResult<Vec<Provider>> {
        if self.store.is_stopping() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT * FROM providers WHERE deleted = 0 AND enabled = 1 ORDER BY priority ASC",
        )
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows.iter().map(row_to_provider).collect())
    }

    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<Provider>> {
        if self.store.is_stopping() {
            return Ok(None);
        }
        let row = sqlx::query("SELECT * FROM providers WHERE id = ?")
            .bind(id)
            .fetch_optional(self.store.pool())
            .await?;
        Ok(row.map(|row| row_to_provider(&row)))
    }

    pub async fn upsert(&self, provider: &Provider) -> AppResult<()> {
        let streams_urls = serde_json::to_string(&provider.streams_urls)?;
        sqlx::query(
            r#"
            INSERT INTO providers (
                id, provider_type, enabled, deleted, priority, api_url, username,
                password, streams_urls, rate_concurrent, rate_duration_seconds
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                provider_type = excluded.provider_type,
                enabled = excluded.enabled,
                deleted = excluded.deleted,
                priority = excluded.priority,
                api_url = excluded.api_url,
                username = excluded.username,
                password = excluded.password,
                streams_urls = excluded.streams_urls,
                rate_concurrent = excluded.rate_concurrent,
                rate_duration_seconds = excluded.rate_duration_seconds
            "#,
        )
        .bind(&provider.id)
        .bind(provider.provider_type.as_str())
        .bind(provider.enabled)
        .bind(provider.deleted)
        .bind(provider.priority)
        .bind(&provider.api_url)
        .bind(&provider.username)
        .bind(&provider.password)
        .bind(&streams_urls)
        .bind(provider.api_rate.concurrent)
        .bind(provider.api_rate.duration_seconds as i64)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }
}

fn row_to_provider(row: &sqlx::sqlite::SqliteRow) -> Provider {
    let provider_type: String = row.get("provider_type");
    let streams_urls: String = row.get("streams_urls");
    Provider {
        id: row.get("id"),
        provider_type: if provider_type == "agtv" {
            ProviderType::Agtv
        } else {
            ProviderType::Xtream
        },
        enabled: row.get("enabled"),
        deleted: row.get("deleted"),
        priority: row.get("priority"),
        api_url: row.get("api_url"),
        username: row.get("username"),
        password: row.get("password"),
        streams_urls: serde_json::from_str(&streams_urls).unwrap_or_default(),
        api_rate: ApiRate {
            concurrent: row.get::<i64, _>("rate_concurrent") as u32,
            duration_seconds: row.get::<i64, _>("rate_duration_seconds") as u64,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, priority: i32) -> Provider {
        Provider {
            id: id.to_string(),
            provider_type: ProviderType::Xtream,
            enabled: true,
            deleted: false,
            priority,
            api_url: "https://example.com".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            streams_urls: vec!["https://cdn.example.com".to_string()],
            api_rate: ApiRate {
                concurrent: 5,
                duration_seconds: 1,
            },
        }
    }

    #[tokio::test]
    async fn providers_are_ordered_by_priority_ascending() {
        let store = Store::connect_test().await.unwrap();
        let repo = ProviderRepository::new(store);
        repo.upsert(&sample("b", 2)).await.unwrap();
        repo.upsert(&sample("a", 1)).await.unwrap();

        let providers = repo.list_enabled_ordered_by_priority().await.unwrap();
        assert_eq!(providers.iter().map(|p| p.id.clone()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn disabled_providers_are_excluded() {
        let store = Store::connect_test().await.unwrap();
        let repo = ProviderRepository::new(store);
        let mut disabled = sample("c", 1);
        disabled.enabled = false;
        repo.upsert(&disabled).await.unwrap();

        let providers = repo.list_enabled_ordered_by_priority().await.unwrap();
        assert!(providers.is_empty());
    }
}
