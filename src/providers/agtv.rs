//! AGTV adapter: a paginated M3U8 manifest, one playlist entry per stream.
//!
//! Grammar: `#EXTINF:<duration> <attr>="<value>"*,<title>` followed by a URL
//! line. Movies are one playlist entry per title; TV entries are grouped by
//! `tvg-id` and each stream URL's last two path segments are parsed as
//! `season/episode`.

use crate::cache::{DiskCache, Ttl};
use crate::error::{AppError, AppResult};
use crate::model::{episode_stream_id, ContentType, ProviderType, MAIN_STREAM_ID};
use crate::providers::{Category, ProviderAdapter, ProviderTitleRaw, TitleDetails};
use crate::rate_limiter::ReservoirLimiter;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub struct AgtvAdapter {
    http: reqwest::Client,
    api_url: String,
    username: String,
    password: String,
    rate_limiter: Arc<ReservoirLimiter>,
    cache: DiskCache,
    provider_id: String,
}

#[derive(Debug, Clone)]
struct PlaylistEntry {
    tvg_id: Option<String>,
    group_title: Option<String>,
    title: String,
    url: String,
}

/// Outcome of fetching one page: a structured end-of-pagination signal
/// (`entries.is_empty()`) rather than sniffing an upstream error string for
/// "no more data" — the original client matched on response text, which
/// broke silently whenever the upstream wording changed.
struct Page {
    entries: Vec<PlaylistEntry>,
}

impl AgtvAdapter {
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

    fn manifest_url(&self, content_type: ContentType, page: u32) -> String {
        format!(
            "{}/get.php?username={}&password={}&type=m3u_plus&category={}&page={page}",
            self.api_url.trim_end_matches('/'),
            self.username,
            self.password,
            content_type.as_str(),
        )
    }

    async fn fetch_page(&self, content_type: ContentType, page: u32) -> AppResult<Page> {
        let path = self.cache.m3u8_path(&self.provider_id, content_type.as_str(), Some(page));
        let url = self.manifest_url(content_type, page);
        let http = self.http.clone();
        let bytes = self
            .cache
            .fetch_raw_with(&path, Ttl::m3u8(), || async move {
                let response = self
                    .rate_limiter
                    .schedule(move || async move { http.get(&url).send().await })
                    .await
                    .ok_or_else(|| AppError::upstream_transient("agtv rate limiter shut down"))??;
                if response.status().is_server_error() {
                    return Err(AppError::upstream_transient(format!(
                        "agtv returned {}",
                        response.status()
                    )));
                }
                if response.status().is_client_error() {
                    return Err(AppError::upstream_permanent(format!(
                        "agtv returned {}",
                        response.status()
                    )));
                }
                Ok(response.bytes().await?.to_vec())
            })
            .await?;

        let text = String::from_utf8_lossy(&bytes);
        Ok(Page {
            entries: parse_m3u8(&text),
        })
    }

    async fn fetch_all_pages(&self, content_type: ContentType) -> AppResult<Vec<PlaylistEntry>> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let fetched = self.fetch_page(content_type, page).await?;
            if fetched.entries.is_empty() {
                break;
            }
            all.extend(fetched.entries);
            page += 1;
        }
        Ok(all)
    }
}

/// Last two path segments of a stream URL, parsed as `season/episode`, e.g.
/// `.../Show%20Name/3/7.mp4` → `(3, 7)`.
fn parse_season_episode(url: &str) -> Option<(u32, u32)> {
    let trimmed = url.split(['?', '#']).next().unwrap_or(url);
    let segments: Vec<&str> = trimmed.trim_end_matches('/').rsplitn(3, '/').collect();
    if segments.len() < 3 {
        return None;
    }
    let episode_segment = segments[0];
    let episode = episode_segment.split('.').next()?.parse::<u32>().ok()?;
    let season = segments[1].parse::<u32>().ok()?;
    Some((season, episode))
}

fn parse_attr<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("{key}=\"");
    let start = line.find(&needle)? + needle.len();
    let rest = &line[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

fn parse_m3u8(text: &str) -> Vec<PlaylistEntry> {
    let mut entries = Vec::new();
    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        let line = line.trim();
        if !line.starts_with("#EXTINF:") {
            continue;
        }
        let title = line.rsplit(',').next().unwrap_or_default().trim().to_string();
        let tvg_id = parse_attr(line, "tvg-id").map(str::to_string);
        let group_title = parse_attr(line, "group-title").map(str::to_string);

        let Some(url_line) = lines.peek() else { break };
        if url_line.trim().starts_with('#') || url_line.trim().is_empty() {
            continue;
        }
        let url = lines.next().unwrap().trim().to_string();
        entries.push(PlaylistEntry {
            tvg_id,
            group_title,
            title,
            url,
        });
    }
    entries
}

#[async_trait]
impl ProviderAdapter for AgtvAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Agtv
    }

    async fn list_categories(&self, content_type: ContentType) -> AppResult<Vec<Category>> {
        let entries = self.fetch_all_pages(content_type).await?;
        let mut seen = std::collections::HashSet::new();
        let mut categories = Vec::new();
        for entry in &entries {
            if let Some(name) = &entry.group_title {
                if seen.insert(name.clone()) {
                    categories.push(Category {
                        id: name.clone(),
                        name: name.clone(),
                    });
                }
            }
        }
        Ok(categories)
    }

    async fn list_titles(&self, content_type: ContentType) -> AppResult<Vec<ProviderTitleRaw>> {
        let entries = self.fetch_all_pages(content_type).await?;
        match content_type {
            // `title_id` is the provider-local id (the tvg-id, e.g. an IMDB
            // id) — the playlist URL is carried separately in `stream_url`
            // so TMDB matching sees the id, not the stream.
            ContentType::Movies => Ok(entries
                .into_iter()
                .filter_map(|entry| {
                    let title_id = entry.tvg_id.clone()?;
                    Some(ProviderTitleRaw {
                        title_id,
                        name: entry.title,
                        modified: None,
                        category_id: entry.group_title.clone(),
                        category_name: entry.group_title,
                        stream_url: Some(entry.url),
                    })
                })
                .collect()),
            ContentType::Tvshows => {
                let mut by_series: HashMap<String, ProviderTitleRaw> = HashMap::new();
                for entry in entries {
                    let Some(tvg_id) = entry.tvg_id.clone() else { continue };
                    by_series.entry(tvg_id.clone()).or_insert_with(|| ProviderTitleRaw {
                        title_id: tvg_id,
                        name: entry.title.clone(),
                        modified: None,
                        category_id: entry.group_title.clone(),
                        category_name: entry.group_title,
                        stream_url: None,
                    });
                }
                Ok(by_series.into_values().collect())
            }
        }
    }

    async fn fetch_title_details(&self, content_type: ContentType, title_id: &str) -> AppResult<TitleDetails> {
        match content_type {
            ContentType::Movies => {
                let entries = self.fetch_all_pages(content_type).await?;
                let mut streams = HashMap::new();
                if let Some(entry) = entries.into_iter().find(|entry| entry.tvg_id.as_deref() == Some(title_id)) {
                    streams.insert(MAIN_STREAM_ID.to_string(), entry.url);
                }
                Ok(TitleDetails {
                    streams,
                    ..Default::default()
                })
            }
            ContentType::Tvshows => {
                let entries = self.fetch_all_pages(content_type).await?;
                let mut streams = HashMap::new();
                for entry in entries {
                    if entry.tvg_id.as_deref() != Some(title_id) {
                        continue;
                    }
                    let Some((season, episode)) = parse_season_episode(&entry.url) else { continue };
                    streams.insert(episode_stream_id(season, episode), entry.url);
                }
                Ok(TitleDetails {
                    streams,
                    ..Default::default()
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_extinf_attributes_and_url() {
        let manifest = concat!(
            "#EXTM3U\n",
            "#EXTINF:-1 tvg-id=\"show1\" group-title=\"Drama\",Show One S1E1\n",
            "http://cdn.example.com/Show%20One/1/1.mp4\n",
        );
        let entries = parse_m3u8(manifest);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tvg_id.as_deref(), Some("show1"));
        assert_eq!(entries[0].group_title.as_deref(), Some("Drama"));
        assert_eq!(entries[0].title, "Show One S1E1");
    }

    #[test]
    fn skips_malformed_entries_without_a_following_url() {
        let manifest = "#EXTINF:-1 tvg-id=\"show1\",Title\n#EXTINF:-1 tvg-id=\"show2\",Other\nhttp://cdn.example.com/x/2/3.mp4\n";
        let entries = parse_m3u8(manifest);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tvg_id.as_deref(), Some("show2"));
    }

    #[test]
    fn parse_season_episode_reads_last_two_segments() {
        assert_eq!(
            parse_season_episode("http://cdn.example.com/Show/3/07.mp4"),
            Some((3, 7))
        );
        assert_eq!(parse_season_episode("http://cdn.example.com/x.mp4"), None);
    }

    #[test]
    fn empty_page_is_the_pagination_terminator() {
        let page = parse_m3u8("#EXTM3U\n");
        assert!(page.is_empty());
    }
}
