//! A single provider's catalog entry for a canonical title.

use crate::model::key::ContentType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One per `(provider_id, title_key)` pair. Exists iff the provider
/// currently advertises the title; soft-ignored rows persist so
/// TMDB re-matching can be retried on a later run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTitle {
    pub provider_id: String,
    pub title_key: String,
    /// Provider-local id: an Xtream `stream_id`, or an IMDB id for AGTV.
    pub title_id: String,
    pub content_type: ContentType,
    pub tmdb_id: Option<String>,
    pub category_id: Option<String>,
    pub release_date: Option<String>,
    pub ignored: bool,
    pub ignored_reason: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl ProviderTitle {
    pub fn document_key(&self) -> Option<(String, String)> {
        if self.provider_id.trim().is_empty() || self.title_key.trim().is_empty() {
            None
        } else {
            Some((self.provider_id.clone(), self.title_key.clone()))
        }
    }

    pub fn mark_ignored(&mut self, kind: &str, detail: &str) {
        self.ignored = true;
        self.ignored_reason = Some(format!("{kind}: {detail}"));
    }
}
