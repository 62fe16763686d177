//! Pluggable upstream driver contract (C3): fetch categories/metadata/
//! extended-info/M3U8 from a provider and normalize it for ingestion.

pub mod agtv;
pub mod xtream;

use crate::error::AppResult;
use crate::model::{ContentType, ProviderType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Category {
    pub id: String,
    pub name: String,
}

/// A provider's catalog entry, before TMDB matching and before its stream
/// map has been resolved via `fetch_title_details`.
#[derive(Debug, Clone)]
pub struct ProviderTitleRaw {
    pub title_id: String,
    pub name: String,
    pub modified: Option<DateTime<Utc>>,
    pub category_id: Option<String>,
    pub category_name: Option<String>,
    /// Direct stream URL, carried separately from `title_id` for adapters
    /// (AGTV) whose provider-local id is not itself the playable URL.
    pub stream_url: Option<String>,
}

/// Extended per-title information: matched TMDB/IMDB ids plus the stream
/// map (`stream_id` → `proxy_url`), movies having a single `"main"` entry.
#[derive(Debug, Clone, Default)]
pub struct TitleDetails {
    pub tmdb_id: Option<String>,
    pub imdb_id: Option<String>,
    pub release_date: Option<String>,
    pub streams: HashMap<String, String>,
}

/// Capability-set shared by both provider variants; dispatch on
/// `provider_type()` happens at adapter construction and at the resolver's
/// probe-strategy selection (§9 "polymorphism over provider type").
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider_type(&self) -> ProviderType;
    async fn list_categories(&self, content_type: ContentType) -> AppResult<Vec<Category>>;
    async fn list_titles(&self, content_type: ContentType) -> AppResult<Vec<ProviderTitleRaw>>;
    async fn fetch_title_details(
        &self,
        content_type: ContentType,
        title_id: &str,
    ) -> AppResult<TitleDetails>;
}

/// Strips well-known release-group/quality suffix markers from a display
/// name before TMDB search, e.g. `"Movie Title (2020) [4K]"` → `"Movie Title"`.
pub fn clean_display_name(raw: &str) -> String {
    let mut name = raw.trim().to_string();
    for marker in ["[", "(", "{"] {
        if let Some(index) = name.find(marker) {
            name.truncate(index);
        }
    }
    name.trim().to_string()
}

/// Extracts a 4-digit year in parentheses/brackets from a raw title, if any.
pub fn extract_year(raw: &str) -> Option<i32> {
    once_cell::sync::Lazy::force(&YEAR_PATTERN)
        .captures(raw)
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

static YEAR_PATTERN: once_cell::sync::Lazy<regex::Regex> =
    once_cell::sync::Lazy::new(|| regex::Regex::new(r"(19\d{2}|20\d{2})").expect("valid regex"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_display_name_strips_bracketed_suffixes() {
        assert_eq!(clean_display_name("The Matrix (1999) [4K]"), "The Matrix");
        assert_eq!(clean_display_name("Plain Title"), "Plain Title");
    }

    #[test]
    fn extract_year_finds_four_digit_years() {
        assert_eq!(extract_year("The Matrix (1999)"), Some(1999));
        assert_eq!(extract_year("No Year Here"), None);
    }
}
