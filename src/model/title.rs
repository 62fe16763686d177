//! Canonical `Title` and its embedded episode-descriptor map.

use crate::model::key::ContentType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata-only episode descriptor, keyed `Sxx-Exx` on [`Title::streams`].
/// Carries no URL — playable locations live in [`crate::model::title_stream::TitleStream`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodeDescriptor {
    pub name: String,
    pub overview: Option<String>,
    pub air_date: Option<String>,
    pub still_path: Option<String>,
}

/// One per deduplicated piece of content, identified by `title_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Title {
    pub title_key: String,
    pub title_id: String,
    pub content_type: ContentType,
    pub title: String,
    pub release_date: Option<String>,
    pub overview: Option<String>,
    pub vote_average: Option<f64>,
    pub genres: Vec<String>,
    pub runtime: Option<i32>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub imdb_id: Option<String>,
    pub streams: HashMap<String, EpisodeDescriptor>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Title {
    /// Dropped silently by the bulk-save pipeline when this is empty or
    /// blank, mirroring `getDocumentKey()` returning falsy in the spec.
    pub fn document_key(&self) -> Option<&str> {
        if self.title_key.trim().is_empty() {
            None
        } else {
            Some(&self.title_key)
        }
    }
}
