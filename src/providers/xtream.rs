//! Xtream adapter: a single JSON query-string endpoint
//! (`player_api.php?username=…&password=…&action=…`).

use crate::cache::{DiskCache, Ttl};
use crate::error::{AppError, AppResult};
use crate::model::{ContentType, ProviderType};
use crate::providers::{Category, ProviderAdapter, ProviderTitleRaw, TitleDetails};
use crate::rate_limiter::ReservoirLimiter;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub struct XtreamAdapter {
    http: reqwest::Client,
    api_url: String,
    username: String,
    password: String,
    rate_limiter: Arc<ReservoirLimiter>,
    cache: DiskCache,
    provider_id: String,
}

impl XtreamAdapter {
    pub fn new(
        provider_id: impl Into<String>,
        api_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        rate_limiter: Arc<ReservoirLimiter>,
        cache: DiskCache,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            username: username.into(),
            password: password.into(),
            rate_limiter,
            cache,
            provider_id: provider_id.into(),
        }
    }

    fn action_url(&self, action: &str, extra: &[(&str, &str)]) -> String {
        let mut url = format!(
            "{}/player_api.php?username={}&password={}&action={}",
            self.api_url.trim_end_matches('/'),
            self.username,
            self.password,
            action
        );
        for (key, value) in extra {
            url.push_str(&format!("&{key}={value}"));
        }
        url
    }

    async fn get(&self, url: String) -> AppResult<Value> {
        let http = self.http.clone();
        let response = self
            .rate_limiter
            .schedule(move || async move { http.get(&url).send().await })
            .await
            .ok_or_else(|| AppError::upstream_transient("xtream rate limiter shut down"))??;

        if response.status().is_server_error() {
            return Err(AppError::upstream_transient(format!(
                "xtream returned {}",
                response.status()
            )));
        }
        if response.status().is_client_error() {
            return Err(AppError::upstream_permanent(format!(
                "xtream returned {}",
                response.status()
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| AppError::upstream_permanent(format!("malformed xtream response: {e}")))
    }

    /// Defensive payload parsing (§9 "dynamic types"): the response is
    /// either a bare array, or `{movie_data: [...]}` / `{series_data: [...]}`.
    fn unwrap_payload<'a>(value: &'a Value, keyed_field: &str) -> AppResult<&'a Vec<Value>> {
        if let Some(array) = value.as_array() {
            return Ok(array);
        }
        if let Some(array) = value.get(keyed_field).and_then(Value::as_array) {
            return Ok(array);
        }
        Err(AppError::upstream_permanent(format!(
            "expected array or keyed payload ({keyed_field}), got {value}"
        )))
    }

    fn stream_action(content_type: ContentType) -> (&'static str, &'static str, &'static str, &'static str) {
        match content_type {
            // (categories_action, titles_action, info_action, id_field)
            ContentType::Movies => ("get_vod_categories", "get_vod_streams", "get_vod_info", "vod_id"),
            ContentType::Tvshows => ("get_series_categories", "get_series", "get_series_info", "series_id"),
        }
    }

    fn stream_path_segment(content_type: ContentType) -> &'static str {
        match content_type {
            ContentType::Movies => "movie",
            ContentType::Tvshows => "series",
        }
    }

    /// `/{movie|series}/{username}/{password}/{stream_id}.{ext}`, stored as
    /// a relative path so `streams_urls` rotation is possible at resolution
    /// time.
    pub fn build_stream_path(content_type: ContentType, username: &str, password: &str, stream_id: &str, ext: &str) -> String {
        format!(
            "/{}/{username}/{password}/{stream_id}.{ext}",
            Self::stream_path_segment(content_type)
        )
    }
}

fn parse_unix_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str().or_else(|| None)?;
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

#[async_trait]
impl ProviderAdapter for XtreamAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Xtream
    }

    async fn list_categories(&self, content_type: ContentType) -> AppResult<Vec<Category>> {
        let (categories_action, _, _, _) = Self::stream_action(content_type);
        let path = self.cache.categories_path(&self.provider_id, content_type.as_str());
        let url = self.action_url(categories_action, &[]);
        let value = self
            .cache
            .fetch_json_with(&path, Ttl::categories(), || async move { self.get(url).await })
            .await?;
        let entries = Self::unwrap_payload(&value, "categories")?;
        Ok(entries
            .iter()
            .filter_map(|entry| {
                Some(Category {
                    id: entry.get("category_id")?.as_str()?.to_string(),
                    name: entry.get("category_name")?.as_str().unwrap_or_default().to_string(),
                })
            })
            .collect())
    }

    async fn list_titles(&self, content_type: ContentType) -> AppResult<Vec<ProviderTitleRaw>> {
        let (_, titles_action, _, id_field) = Self::stream_action(content_type);
        let keyed_field = match content_type {
            ContentType::Movies => "movie_data",
            ContentType::Tvshows => "series_data",
        };
        let path = self.cache.metadata_path(&self.provider_id, content_type.as_str());
        let url = self.action_url(titles_action, &[]);
        let value = self
            .cache
            .fetch_json_with(&path, Ttl::metadata(), || async move { self.get(url).await })
            .await?;
        let entries = Self::unwrap_payload(&value, keyed_field)?;

        let id_key = match content_type {
            ContentType::Movies => "stream_id",
            ContentType::Tvshows => "series_id",
        };
        let modified_key = match content_type {
            ContentType::Movies => "added",
            ContentType::Tvshows => "last_modified",
        };
        let _ = id_field;

        Ok(entries
            .iter()
            .filter_map(|entry| {
                let title_id = entry.get(id_key)?;
                let title_id = title_id
                    .as_str()
                    .map(str::to_string)
                    .or_else(|| title_id.as_i64().map(|n| n.to_string()))?;
                Some(ProviderTitleRaw {
                    title_id,
                    name: entry.get("name")?.as_str().unwrap_or_default().to_string(),
                    modified: parse_unix_timestamp(entry.get(modified_key)),
                    category_id: entry.get("category_id").and_then(Value::as_str).map(str::to_string),
                    category_name: None,
                    stream_url: None,
                })
            })
            .collect())
    }

    async fn fetch_title_details(&self, content_type: ContentType, title_id: &str) -> AppResult<TitleDetails> {
        let (_, _, info_action, id_field) = Self::stream_action(content_type);
        let path = self.cache.extended_path(&self.provider_id, content_type.as_str(), title_id);
        let ttl = match content_type {
            ContentType::Movies => Ttl::movies_extended(),
            ContentType::Tvshows => Ttl::tvshows_extended(),
        };
        let url = self.action_url(info_action, &[(id_field, title_id)]);
        let value = self
            .cache
            .fetch_json_with(&path, ttl, || async move { self.get(url).await })
            .await?;

        let info = value.get("info").cloned().unwrap_or(Value::Null);
        let tmdb_id = info
            .get("tmdb_id")
            .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())));

        match content_type {
            ContentType::Movies => {
                let movie_data = value.get("movie_data").cloned().unwrap_or(Value::Null);
                let stream_id = movie_data
                    .get("stream_id")
                    .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())))
                    .unwrap_or_else(|| title_id.to_string());
                let ext = movie_data
                    .get("container_extension")
                    .and_then(Value::as_str)
                    .unwrap_or("mp4");
                let mut streams = HashMap::new();
                streams.insert(
                    crate::model::MAIN_STREAM_ID.to_string(),
                    Self::build_stream_path(content_type, &self.username, &self.password, &stream_id, ext),
                );
                Ok(TitleDetails {
                    tmdb_id,
                    imdb_id: info.get("imdb_id").and_then(Value::as_str).map(str::to_string),
                    release_date: info.get("releasedate").and_then(Value::as_str).map(str::to_string),
                    streams,
                })
            }
            ContentType::Tvshows => {
                let mut streams = HashMap::new();
                if let Some(episodes_by_season) = value.get("episodes").and_then(Value::as_object) {
                    for episode_list in episodes_by_season.values() {
                        let Some(episode_list) = episode_list.as_array() else { continue };
                        for episode in episode_list {
                            let Some(season) = episode.get("season_num").and_then(Value::as_i64) else { continue };
                            let Some(episode_num) = episode.get("episode_num").and_then(Value::as_i64) else { continue };
                            let Some(episode_id) = episode
                                .get("id")
                                .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())))
                            else {
                                continue;
                            };
                            let ext = episode
                                .get("container_extension")
                                .and_then(Value::as_str)
                                .unwrap_or("mp4");
                            let stream_key = crate::model::episode_stream_id(season as u32, episode_num as u32);
                            streams.insert(
                                stream_key,
                                Self::build_stream_path(content_type, &self.username, &self.password, &episode_id, ext),
                            );
                        }
                    }
                }
                Ok(TitleDetails {
                    tmdb_id,
                    imdb_id: info.get("imdb_id").and_then(Value::as_str).map(str::to_string),
                    release_date: info.get("releaseDate").and_then(Value::as_str).map(str::to_string),
                    streams,
                })
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct XtreamEpisodeRef {
    id: Value,
    season_num: i64,
    episode_num: i64,
    container_extension: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_stream_path_uses_movie_segment() {
        let path = XtreamAdapter::build_stream_path(ContentType::Movies, "u", "p", "42", "mp4");
        assert_eq!(path, "/movie/u/p/42.mp4");
    }

    #[test]
    fn build_stream_path_uses_series_segment() {
        let path = XtreamAdapter::build_stream_path(ContentType::Tvshows, "u", "p", "42", "mkv");
        assert_eq!(path, "/series/u/p/42.mkv");
    }

    #[test]
    fn unwrap_payload_accepts_bare_array() {
        let value = serde_json::json!([{"a": 1}]);
        let result = XtreamAdapter::unwrap_payload(&value, "movie_data").unwrap();
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn unwrap_payload_accepts_keyed_object() {
        let value = serde_json::json!({"movie_data": [{"a": 1}, {"a": 2}]});
        let result = XtreamAdapter::unwrap_payload(&value, "movie_data").unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn unwrap_payload_rejects_anything_else() {
        let value = serde_json::json!({"unexpected": true});
        assert!(XtreamAdapter::unwrap_payload(&value, "movie_data").is_err());
    }
}
