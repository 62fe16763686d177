//! TMDB resolver (C4): title→TMDB-id matching, rate-limited and cached.

use crate::cache::{DiskCache, Ttl};
use crate::error::{AppError, AppResult};
use crate::rate_limiter::ReservoirLimiter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TmdbMediaType {
    Movie,
    Tv,
}

impl TmdbMediaType {
    fn path_segment(&self) -> &'static str {
        match self {
            TmdbMediaType::Movie => "movie",
            TmdbMediaType::Tv => "tv",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbDetails {
    pub id: i64,
    pub title: Option<String>,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub release_date: Option<String>,
    pub first_air_date: Option<String>,
    pub vote_average: Option<f64>,
    pub runtime: Option<i32>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub genres: Vec<TmdbGenre>,
    pub imdb_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbGenre {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbSearchResponse {
    pub results: Vec<TmdbSearchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbSearchResult {
    pub id: i64,
    pub title: Option<String>,
    pub name: Option<String>,
    pub release_date: Option<String>,
    pub first_air_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbFindResponse {
    #[serde(default)]
    pub movie_results: Vec<TmdbSearchResult>,
    #[serde(default)]
    pub tv_results: Vec<TmdbSearchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbSeason {
    pub id: i64,
    pub season_number: i32,
    #[serde(default)]
    pub episodes: Vec<TmdbEpisode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbEpisode {
    pub episode_number: i32,
    pub name: String,
    pub overview: Option<String>,
    pub air_date: Option<String>,
    pub still_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbSimilarResponse {
    pub page: i32,
    pub results: Vec<TmdbSearchResult>,
}

/// TMDB v3 client, single global reservoir (45 concurrent / 1s) shared by
/// every caller regardless of which provider's ingestion triggered it.
#[derive(Clone)]
pub struct TmdbClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Arc<RwLock<String>>,
    rate_limiter: Arc<ReservoirLimiter>,
    cache: DiskCache,
}

impl TmdbClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        rate_limiter: Arc<ReservoirLimiter>,
        cache: DiskCache,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: Arc::new(RwLock::new(api_key.into())),
            rate_limiter,
            cache,
        }
    }

    /// API key is rotatable at runtime; an unset key fails calls with a
    /// typed `ConfigurationError` rather than panicking.
    pub async fn rotate_api_key(&self, new_key: String) {
        *self.api_key.write().await = new_key;
    }

    async fn require_api_key(&self) -> AppResult<String> {
        let key = self.api_key.read().await.clone();
        if key.trim().is_empty() {
            return Err(AppError::configuration("TMDB API key is not set"));
        }
        Ok(key)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> AppResult<T> {
        let api_key = self.require_api_key().await?;
        let url = format!("{}{}", self.base_url, path);
        let http = self.http.clone();

        let response = self
            .rate_limiter
            .schedule(move || async move {
                http.get(&url)
                    .bearer_auth(&api_key)
                    .send()
                    .await
            })
            .await
            .ok_or_else(|| AppError::upstream_transient("TMDB rate limiter shut down"))??;

        if response.status().is_server_error() || response.status().is_client_error() {
            let status = response.status();
            if status.is_server_error() {
                return Err(AppError::upstream_transient(format!("TMDB returned {status}")));
            }
            return Err(AppError::upstream_permanent(format!("TMDB returned {status}")));
        }

        Ok(response.json::<T>().await?)
    }

    /// `verify`: checks the configured key is accepted by TMDB. Never
    /// cached — a key can be rotated at any moment.
    pub async fn verify(&self) -> AppResult<bool> {
        match self.get_json::<serde_json::Value>("/authentication/token/new").await {
            Ok(_) => Ok(true),
            Err(AppError::UpstreamPermanent(_)) => Ok(false),
            Err(other) => Err(other),
        }
    }

    pub async fn search(
        &self,
        media_type: TmdbMediaType,
        title: &str,
        year: Option<i32>,
    ) -> AppResult<TmdbSearchResponse> {
        let slug = format!(
            "{}-{}",
            slugify(title),
            year.map(|y| y.to_string()).unwrap_or_default()
        );
        let path = self.cache.tmdb_path(media_type.path_segment(), "search", &slug);
        let media_segment = media_type.path_segment().to_string();
        let query_title = title.to_string();
        self.cache
            .fetch_json_with(&path, Ttl::tmdb_lookup(), || async move {
                let mut url = format!(
                    "/search/{media_segment}?query={}",
                    urlencoding_lite(&query_title)
                );
                if let Some(year) = year {
                    url.push_str(&format!("&year={year}"));
                }
                self.get_json(&url).await
            })
            .await
    }

    pub async fn find_by_imdb(
        &self,
        imdb_id: &str,
        media_type: TmdbMediaType,
    ) -> AppResult<TmdbFindResponse> {
        let path = self.cache.tmdb_path(media_type.path_segment(), "imdb", imdb_id);
        let imdb_id = imdb_id.to_string();
        self.cache
            .fetch_json_with(&path, Ttl::tmdb_lookup(), || async move {
                self.get_json(&format!("/find/{imdb_id}?external_source=imdb_id"))
                    .await
            })
            .await
    }

    pub async fn details(&self, media_type: TmdbMediaType, tmdb_id: &str) -> AppResult<TmdbDetails> {
        let path = self.cache.tmdb_path(media_type.path_segment(), "details", tmdb_id);
        let media_segment = media_type.path_segment().to_string();
        let tmdb_id = tmdb_id.to_string();
        self.cache
            .fetch_json_with(&path, Ttl::tmdb_lookup(), || async move {
                self.get_json(&format!("/{media_segment}/{tmdb_id}")).await
            })
            .await
    }

    /// `season` is cached for 6h, unlike every other lookup (cached
    /// forever) — episode lists can change mid-season.
    pub async fn season(&self, tmdb_id: &str, season_number: i32) -> AppResult<TmdbSeason> {
        let slug = format!("{tmdb_id}/{season_number}");
        let path = self.cache.tmdb_path("tv", "season", &slug);
        let tmdb_id = tmdb_id.to_string();
        self.cache
            .fetch_json_with(&path, Ttl::tmdb_season(), || async move {
                self.get_json(&format!("/tv/{tmdb_id}/season/{season_number}"))
                    .await
            })
            .await
    }

    pub async fn similar(
        &self,
        media_type: TmdbMediaType,
        tmdb_id: &str,
        page: i32,
    ) -> AppResult<TmdbSimilarResponse> {
        let slug = format!("{tmdb_id}/{page}");
        let path = self.cache.tmdb_path(media_type.path_segment(), "similar", &slug);
        let media_segment = media_type.path_segment().to_string();
        let tmdb_id = tmdb_id.to_string();
        self.cache
            .fetch_json_with(&path, Ttl::tmdb_lookup(), || async move {
                self.get_json(&format!("/{media_segment}/{tmdb_id}/similar?page={page}"))
                    .await
            })
            .await
    }
}

fn slugify(input: &str) -> String {
    input
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

fn urlencoding_lite(input: &str) -> String {
    url::form_urlencoded::byte_serialize(input.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_normalizes_punctuation_and_case() {
        assert_eq!(slugify("The Matrix: Reloaded"), "the-matrix--reloaded");
    }

    #[tokio::test]
    async fn missing_api_key_is_a_configuration_error() {
        let cache = DiskCache::new(std::env::temp_dir().join("iptv-gateway-tmdb-test"));
        let limiter = crate::rate_limiter::ReservoirLimiter::new(
            crate::rate_limiter::ReservoirConfig::tmdb_default(),
        );
        let client = TmdbClient::new("https://api.themoviedb.org/3", "", limiter, cache);
        let result = client.details(TmdbMediaType::Movie, "123").await;
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }
}
