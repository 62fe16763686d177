//! Provider ingestion pipeline (C6): fetch → skip → TMDB-match → batch
//! persist → prune, one provider/type at a time.

use crate::error::AppError;
use crate::model::{
    episode_stream_id, title_key, ContentType, EpisodeDescriptor, Provider, ProviderTitle, Title,
    TitleStream,
};
use crate::providers::{clean_display_name, extract_year, ProviderAdapter, ProviderTitleRaw};
use crate::repository::provider_titles::ProviderTitleRepository;
use crate::repository::title_streams::TitleStreamRepository;
use crate::repository::titles::TitleRepository;
use crate::tmdb::{TmdbClient, TmdbMediaType};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

static IMDB_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^tt\d+$").expect("valid regex"));

fn looks_like_imdb_id(id: &str) -> bool {
    IMDB_ID.is_match(id)
}

/// Tracks remaining work for one `(provider, type)` pass; a background timer
/// periodically snapshots the remaining count and invokes `on_tick` (§9
/// "callbacks-in-state"), stopping once the count reaches zero or the run is
/// dropped.
pub struct IngestionProgress {
    remaining: AtomicU64,
    cancel: CancellationToken,
}

impl IngestionProgress {
    pub fn start(total: u64, interval: std::time::Duration, on_tick: impl Fn(u64) + Send + 'static) -> Arc<Self> {
        let progress = Arc::new(Self {
            remaining: AtomicU64::new(total),
            cancel: CancellationToken::new(),
        });
        let weak = Arc::downgrade(&progress);
        tokio::spawn(async move {
            loop {
                let Some(progress) = weak.upgrade() else { return };
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let remaining = progress.remaining.load(Ordering::SeqCst);
                        on_tick(remaining);
                        if remaining == 0 {
                            return;
                        }
                    }
                    _ = progress.cancel.cancelled() => return,
                }
            }
        });
        progress
    }

    pub fn decrement(&self) {
        self.remaining.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for IngestionProgress {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Clone)]
pub struct IngestionPipeline {
    pub titles: TitleRepository,
    pub provider_titles: ProviderTitleRepository,
    pub title_streams: TitleStreamRepository,
    pub tmdb: TmdbClient,
    pub metadata_batch_size_xtream: usize,
    pub metadata_batch_size_agtv: usize,
}

impl IngestionPipeline {
    /// One provider, one type: fetch, diff against stored ProviderTitles,
    /// batch-persist, then prune anything no longer advertised.
    pub async fn run_provider_type(
        &self,
        provider: &Provider,
        adapter: &dyn ProviderAdapter,
        content_type: ContentType,
    ) -> crate::error::AppResult<()> {
        let raws = adapter.list_titles(content_type).await?;
        let existing_by_provider_local_id: HashMap<String, ProviderTitle> = self
            .provider_titles
            .find_by_provider_and_type(&provider.id, content_type)
            .await?
            .into_iter()
            .map(|row| (row.title_id.clone(), row))
            .collect();

        let batch_size = match provider.provider_type {
            crate::model::ProviderType::Xtream => self.metadata_batch_size_xtream,
            crate::model::ProviderType::Agtv => self.metadata_batch_size_agtv,
        };

        let total = raws.len() as u64;
        let provider_id_for_log = provider.id.clone();
        let progress = IngestionProgress::start(total, std::time::Duration::from_secs(30), move |remaining| {
            debug!(provider = %provider_id_for_log, remaining, "ingestion progress");
        });

        let mut seen_title_keys: HashSet<String> = HashSet::new();
        let mut provider_title_batch: Vec<ProviderTitle> = Vec::new();
        let mut title_stream_batch: Vec<TitleStream> = Vec::new();
        let mut title_batch: Vec<Title> = Vec::new();

        for raw in raws {
            progress.decrement();
            let existing = existing_by_provider_local_id.get(&raw.title_id);

            if content_type == ContentType::Movies && should_skip_movie(existing, &raw) {
                if let Some(existing) = existing {
                    seen_title_keys.insert(existing.title_key.clone());
                }
                continue;
            }
            if content_type == ContentType::Tvshows
                && provider.provider_type == crate::model::ProviderType::Xtream
                && should_skip_tv_xtream(existing, &raw)
            {
                if let Some(existing) = existing {
                    seen_title_keys.insert(existing.title_key.clone());
                }
                continue;
            }

            let details = match adapter.fetch_title_details(content_type, &raw.title_id).await {
                Ok(details) => details,
                Err(AppError::UpstreamTransient(detail)) | Err(AppError::UpstreamPermanent(detail)) => {
                    warn!(provider = %provider.id, title_id = %raw.title_id, %detail, "title fetch failed, ignoring");
                    let mut provider_title = existing.cloned().unwrap_or_else(|| blank_provider_title(provider, content_type, &raw));
                    provider_title.mark_ignored("fetch_failed", &detail);
                    seen_title_keys.insert(provider_title.title_key.clone());
                    provider_title_batch.push(provider_title);
                    continue;
                }
                Err(other) => return Err(other),
            };

            if content_type == ContentType::Tvshows
                && provider.provider_type == crate::model::ProviderType::Agtv
                && should_skip_tv_agtv(&self.title_streams, &provider.id, existing, &details).await
            {
                if let Some(existing) = existing {
                    seen_title_keys.insert(existing.title_key.clone());
                }
                continue;
            }

            let clean_name = clean_display_name(&raw.name);
            let year = extract_year(&raw.name);

            let tmdb_id = match &details.tmdb_id {
                Some(id) if !id.trim().is_empty() => Some(id.clone()),
                _ => match self.match_tmdb_id(content_type, &raw.title_id, &clean_name, year).await {
                    Ok(id) => Some(id),
                    Err((kind, detail)) => {
                        let mut provider_title = existing.cloned().unwrap_or_else(|| blank_provider_title(provider, content_type, &raw));
                        provider_title.mark_ignored(&kind, &detail);
                        seen_title_keys.insert(provider_title.title_key.clone());
                        provider_title_batch.push(provider_title);
                        continue;
                    }
                },
            };
            let Some(tmdb_id) = tmdb_id else { continue };

            let key = title_key(content_type, &tmdb_id);
            seen_title_keys.insert(key.clone());

            let mut provider_title = existing.cloned().unwrap_or_else(|| blank_provider_title(provider, content_type, &raw));
            provider_title.title_key = key.clone();
            provider_title.title_id = raw.title_id.clone();
            provider_title.tmdb_id = Some(tmdb_id.clone());
            provider_title.category_id = raw.category_id.clone();
            provider_title.release_date = details.release_date.clone();
            provider_title.ignored = false;
            provider_title.ignored_reason = None;
            provider_title_batch.push(provider_title);

            let now = Utc::now();
            for (stream_id, proxy_url) in &details.streams {
                title_stream_batch.push(TitleStream {
                    title_key: key.clone(),
                    stream_id: stream_id.clone(),
                    provider_id: provider.id.clone(),
                    proxy_url: proxy_url.clone(),
                    last_updated: now,
                });
            }

            if !details.streams.is_empty() {
                title_batch.push(self.build_title(content_type, &tmdb_id, &clean_name, &details).await?);
            }

            if provider_title_batch.len() >= batch_size {
                self.flush(&mut provider_title_batch, &mut title_stream_batch, &mut title_batch)
                    .await?;
            }
        }

        self.flush(&mut provider_title_batch, &mut title_stream_batch, &mut title_batch)
            .await?;

        let removed_titles = self
            .provider_titles
            .prune_missing(&provider.id, content_type, &seen_title_keys)
            .await?;
        let orphans = self.titles.delete_orphans().await?;
        info!(
            provider = %provider.id,
            content_type = %content_type,
            removed_titles,
            orphans,
            "ingestion pass complete"
        );
        Ok(())
    }

    async fn flush(
        &self,
        provider_title_batch: &mut Vec<ProviderTitle>,
        title_stream_batch: &mut Vec<TitleStream>,
        title_batch: &mut Vec<Title>,
    ) -> crate::error::AppResult<()> {
        if provider_title_batch.is_empty() && title_stream_batch.is_empty() && title_batch.is_empty() {
            return Ok(());
        }
        self.provider_titles.bulk_save(provider_title_batch).await?;
        self.title_streams.bulk_save(title_stream_batch).await?;
        self.titles.bulk_save(title_batch).await?;
        provider_title_batch.clear();
        title_stream_batch.clear();
        title_batch.clear();
        Ok(())
    }

    async fn build_title(
        &self,
        content_type: ContentType,
        tmdb_id: &str,
        fallback_name: &str,
        details: &crate::providers::TitleDetails,
    ) -> crate::error::AppResult<Title> {
        let media_type = match content_type {
            ContentType::Movies => TmdbMediaType::Movie,
            ContentType::Tvshows => TmdbMediaType::Tv,
        };
        let now = Utc::now();
        match self.tmdb.details(media_type, tmdb_id).await {
            Ok(info) => Ok(Title {
                title_key: title_key(content_type, tmdb_id),
                title_id: tmdb_id.to_string(),
                content_type,
                title: info.title.or(info.name).unwrap_or_else(|| fallback_name.to_string()),
                release_date: info.release_date.or(info.first_air_date),
                overview: info.overview,
                vote_average: info.vote_average,
                genres: info.genres.into_iter().map(|g| g.name).collect(),
                runtime: info.runtime,
                poster_path: info.poster_path,
                backdrop_path: info.backdrop_path,
                imdb_id: info.imdb_id.or_else(|| details.imdb_id.clone()),
                streams: HashMap::new(),
                created_at: now,
                last_updated: now,
            }),
            Err(_) => Ok(Title {
                title_key: title_key(content_type, tmdb_id),
                title_id: tmdb_id.to_string(),
                content_type,
                title: fallback_name.to_string(),
                release_date: details.release_date.clone(),
                overview: None,
                vote_average: None,
                genres: Vec::new(),
                runtime: None,
                poster_path: None,
                backdrop_path: None,
                imdb_id: details.imdb_id.clone(),
                streams: HashMap::new(),
                created_at: now,
                last_updated: now,
            }),
        }
    }

    async fn match_tmdb_id(
        &self,
        content_type: ContentType,
        provider_local_id: &str,
        clean_name: &str,
        year: Option<i32>,
    ) -> Result<String, (String, String)> {
        let media_type = match content_type {
            ContentType::Movies => TmdbMediaType::Movie,
            ContentType::Tvshows => TmdbMediaType::Tv,
        };

        if looks_like_imdb_id(provider_local_id) {
            match self.tmdb.find_by_imdb(provider_local_id, media_type).await {
                Ok(found) => {
                    let result = match content_type {
                        ContentType::Movies => found.movie_results.into_iter().next(),
                        ContentType::Tvshows => found.tv_results.into_iter().next(),
                    };
                    match result {
                        Some(result) => return Ok(result.id.to_string()),
                        None => return Err(("no_match".to_string(), format!("no TMDB result for imdb id {provider_local_id}"))),
                    }
                }
                Err(err) => return Err(tmdb_error_kind(err)),
            }
        }

        match self.tmdb.search(media_type, clean_name, year).await {
            Ok(response) => match response.results.into_iter().next() {
                Some(result) => Ok(result.id.to_string()),
                None => Err(("no_match".to_string(), format!("no TMDB search result for '{clean_name}'"))),
            },
            Err(err) => Err(tmdb_error_kind(err)),
        }
    }
}

fn tmdb_error_kind(err: AppError) -> (String, String) {
    match err {
        AppError::Configuration(detail) => ("configuration_error".to_string(), detail),
        AppError::UpstreamTransient(detail) => ("upstream_transient".to_string(), detail),
        AppError::UpstreamPermanent(detail) => ("upstream_permanent".to_string(), detail),
        other => ("internal_error".to_string(), other.to_string()),
    }
}

fn blank_provider_title(provider: &Provider, content_type: ContentType, raw: &ProviderTitleRaw) -> ProviderTitle {
    ProviderTitle {
        provider_id: provider.id.clone(),
        title_key: String::new(),
        title_id: raw.title_id.clone(),
        content_type,
        tmdb_id: None,
        category_id: raw.category_id.clone(),
        release_date: None,
        ignored: false,
        ignored_reason: None,
        last_updated: Utc::now(),
    }
}

fn should_skip_movie(existing: Option<&ProviderTitle>, raw: &ProviderTitleRaw) -> bool {
    match existing {
        Some(existing) => raw.modified.map_or(true, |modified| modified <= existing.last_updated),
        None => false,
    }
}

fn should_skip_tv_xtream(existing: Option<&ProviderTitle>, raw: &ProviderTitleRaw) -> bool {
    match (existing, raw.modified) {
        (Some(existing), Some(modified)) => modified <= existing.last_updated,
        _ => false,
    }
}

async fn should_skip_tv_agtv(
    title_streams: &TitleStreamRepository,
    provider_id: &str,
    existing: Option<&ProviderTitle>,
    details: &crate::providers::TitleDetails,
) -> bool {
    let Some(existing) = existing else { return false };
    if existing.title_key.is_empty() {
        return false;
    }
    let stored = match title_streams
        .stream_ids_for_provider_and_title(provider_id, &existing.title_key)
        .await
    {
        Ok(stored) => stored,
        Err(_) => return false,
    };
    let fresh: HashSet<String> = details.streams.keys().cloned().collect();
    stored == fresh
}

/// Renders an episode-descriptor map from a TMDB season lookup, used to
/// backfill `Title.streams` metadata (names/overviews/air dates) once a
/// show's `tmdb_id` is known; ingestion calls this lazily, not per-title,
/// to stay inside the TMDB rate limiter's budget.
pub async fn episode_descriptors_for_season(
    tmdb: &TmdbClient,
    tmdb_id: &str,
    season_number: i32,
) -> crate::error::AppResult<HashMap<String, EpisodeDescriptor>> {
    let season = tmdb.season(tmdb_id, season_number).await?;
    Ok(season
        .episodes
        .into_iter()
        .map(|episode| {
            (
                episode_stream_id(season_number as u32, episode.episode_number as u32),
                EpisodeDescriptor {
                    name: episode.name,
                    overview: episode.overview,
                    air_date: episode.air_date,
                    still_path: episode.still_path,
                },
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_provider_title(title_key: &str, last_updated: chrono::DateTime<Utc>) -> ProviderTitle {
        ProviderTitle {
            provider_id: "p1".to_string(),
            title_key: title_key.to_string(),
            title_id: "1".to_string(),
            content_type: ContentType::Movies,
            tmdb_id: Some("1".to_string()),
            category_id: None,
            release_date: None,
            ignored: false,
            ignored_reason: None,
            last_updated,
        }
    }

    fn sample_raw(modified: Option<chrono::DateTime<Utc>>) -> ProviderTitleRaw {
        ProviderTitleRaw {
            title_id: "1".to_string(),
            name: "Example".to_string(),
            modified,
            category_id: None,
            category_name: None,
            stream_url: None,
        }
    }

    #[test]
    fn movie_skip_when_no_newer_modified_timestamp() {
        let now = Utc::now();
        let existing = sample_provider_title("movies-1", now);
        assert!(should_skip_movie(Some(&existing), &sample_raw(Some(now - Duration::seconds(5)))));
        assert!(should_skip_movie(Some(&existing), &sample_raw(None)));
        assert!(!should_skip_movie(Some(&existing), &sample_raw(Some(now + Duration::seconds(5)))));
        assert!(!should_skip_movie(None, &sample_raw(None)));
    }

    #[test]
    fn tv_xtream_requires_a_modified_timestamp_to_skip() {
        let now = Utc::now();
        let existing = sample_provider_title("tvshows-1", now);
        assert!(!should_skip_tv_xtream(Some(&existing), &sample_raw(None)));
        assert!(should_skip_tv_xtream(Some(&existing), &sample_raw(Some(now))));
        assert!(!should_skip_tv_xtream(Some(&existing), &sample_raw(Some(now + Duration::seconds(5)))));
    }

    #[test]
    fn looks_like_imdb_id_matches_tt_prefixed_ids() {
        assert!(looks_like_imdb_id("tt0111161"));
        assert!(!looks_like_imdb_id("101"));
    }
}
