//! Content-addressed disk cache for upstream responses.
//!
//! Paths are pure functions of `(scope, category, endpoint, params)` so two
//! callers racing to populate the same key write to the same file; the last
//! writer wins and that is an accepted race, not a bug (§5 shared-resource
//! policy: the disk cache is last-writer-wins and non-authoritative).

use crate::error::AppResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// TTL for a cache entry. `Never` entries are read back regardless of age.
#[derive(Debug, Clone, Copy)]
pub enum Ttl {
    Never,
    After(Duration),
}

impl Ttl {
    pub fn categories() -> Self {
        Ttl::After(Duration::from_secs(3600))
    }

    pub fn metadata() -> Self {
        Ttl::After(Duration::from_secs(3600))
    }

    pub fn m3u8() -> Self {
        Ttl::After(Duration::from_secs(6 * 3600))
    }

    pub fn tvshows_extended() -> Self {
        Ttl::After(Duration::from_secs(6 * 3600))
    }

    pub fn movies_extended() -> Self {
        Ttl::Never
    }

    pub fn tmdb_lookup() -> Self {
        Ttl::Never
    }

    pub fn tmdb_season() -> Self {
        Ttl::After(Duration::from_secs(6 * 3600))
    }
}

/// Disk-backed cache rooted at a configured directory.
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `{CACHE_DIR}/{providerId}/categories/{type}.json`
    pub fn categories_path(&self, provider_id: &str, content_type: &str) -> PathBuf {
        self.root
            .join(provider_id)
            .join("categories")
            .join(format!("{content_type}.json"))
    }

    /// `{CACHE_DIR}/{providerId}/metadata/{type}.json`
    pub fn metadata_path(&self, provider_id: &str, content_type: &str) -> PathBuf {
        self.root
            .join(provider_id)
            .join("metadata")
            .join(format!("{content_type}.json"))
    }

    /// `{CACHE_DIR}/{providerId}/extended/{type}/{titleId}.json`
    pub fn extended_path(&self, provider_id: &str, content_type: &str, title_id: &str) -> PathBuf {
        self.root
            .join(provider_id)
            .join("extended")
            .join(content_type)
            .join(format!("{title_id}.json"))
    }

    /// `{CACHE_DIR}/{providerId}/{type}/metadata/list[-{page}].m3u8`
    pub fn m3u8_path(&self, provider_id: &str, content_type: &str, page: Option<u32>) -> PathBuf {
        let filename = match page {
            Some(page) => format!("list-{page}.m3u8"),
            None => "list.m3u8".to_string(),
        };
        self.root
            .join(provider_id)
            .join(content_type)
            .join("metadata")
            .join(filename)
    }

    /// `{CACHE_DIR}/tmdb/{movie|tv}/{search|imdb|details|season|similar}/{slug}`
    pub fn tmdb_path(&self, media_type: &str, operation: &str, slug: &str) -> PathBuf {
        self.root
            .join("tmdb")
            .join(media_type)
            .join(operation)
            .join(slug)
    }

    async fn is_fresh(path: &Path, ttl: Ttl) -> bool {
        let ttl = match ttl {
            Ttl::Never => return true,
            Ttl::After(duration) => duration,
        };
        match fs::metadata(path).await.and_then(|meta| meta.modified()) {
            Ok(modified) => modified.elapsed().map(|age| age < ttl).unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn read_json<T: DeserializeOwned>(&self, path: &Path, ttl: Ttl) -> Option<T> {
        if !path.exists() || !Self::is_fresh(path, ttl).await {
            return None;
        }
        let bytes = fs::read(path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub async fn read_raw(&self, path: &Path, ttl: Ttl) -> Option<Vec<u8>> {
        if !path.exists() || !Self::is_fresh(path, ttl).await {
            return None;
        }
        fs::read(path).await.ok()
    }

    pub async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let pretty = serde_json::to_vec_pretty(value)?;
        fs::write(path, pretty).await?;
        Ok(())
    }

    pub async fn write_raw(&self, path: &Path, bytes: &[u8]) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, bytes).await?;
        Ok(())
    }

    /// Check cache; on miss, run `fetch`, optionally `transform` the result,
    /// persist it, and return it.
    pub async fn fetch_json_with<T, F, Fut>(
        &self,
        path: &Path,
        ttl: Ttl,
        fetch: F,
    ) -> AppResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = AppResult<T>>,
    {
        if let Some(cached) = self.read_json::<T>(path, ttl).await {
            return Ok(cached);
        }
        let value = fetch().await?;
        self.write_json(path, &value).await?;
        Ok(value)
    }

    pub async fn fetch_raw_with<F, Fut>(&self, path: &Path, ttl: Ttl, fetch: F) -> AppResult<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = AppResult<Vec<u8>>>,
    {
        if let Some(cached) = self.read_raw(path, ttl).await {
            return Ok(cached);
        }
        let value = fetch().await?;
        self.write_raw(path, &value).await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_cache() -> (DiskCache, tempdir_like::TempRoot) {
        let root = tempdir_like::TempRoot::new("iptv-gateway-cache-test");
        (DiskCache::new(root.path.clone()), root)
    }

    mod tempdir_like {
        use std::path::PathBuf;

        pub struct TempRoot {
            pub path: PathBuf,
        }

        impl TempRoot {
            pub fn new(name: &str) -> Self {
                let path = std::env::temp_dir().join(format!(
                    "{name}-{}",
                    std::process::id()
                ));
                Self { path }
            }
        }

        impl Drop for TempRoot {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.path);
            }
        }
    }

    #[tokio::test]
    async fn write_then_read_json_roundtrips() {
        let (cache, root) = test_cache();
        let path = cache.categories_path("p1", "movies");
        cache.write_json(&path, &json!({"a": 1})).await.unwrap();
        let value: serde_json::Value = cache.read_json(&path, Ttl::Never).await.unwrap();
        assert_eq!(value["a"], 1);
        drop(root);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let (cache, root) = test_cache();
        let path = cache.metadata_path("p1", "movies");
        cache.write_json(&path, &json!({"a": 1})).await.unwrap();

        let value: Option<serde_json::Value> = cache
            .read_json(&path, Ttl::After(Duration::from_millis(0)))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let value_after: Option<serde_json::Value> = cache
            .read_json(&path, Ttl::After(Duration::from_millis(0)))
            .await;
        assert!(value.is_none() || value_after.is_none());
        drop(root);
    }

    #[tokio::test]
    async fn missing_file_is_a_miss() {
        let (cache, root) = test_cache();
        let path = cache.extended_path("p1", "movies", "42");
        let value: Option<serde_json::Value> = cache.read_json(&path, Ttl::Never).await;
        assert!(value.is_none());
        drop(root);
    }

    #[test]
    fn m3u8_path_includes_page_when_present() {
        let cache = DiskCache::new("/cache");
        assert_eq!(
            cache.m3u8_path("p1", "tvshows", Some(2)),
            PathBuf::from("/cache/p1/tvshows/metadata/list-2.m3u8")
        );
        assert_eq!(
            cache.m3u8_path("p1", "tvshows", None),
            PathBuf::from("/cache/p1/tvshows/metadata/list.m3u8")
        );
    }
}
