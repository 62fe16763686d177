//! Where a title's actual playable URL lives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One per `(title_key, stream_id, provider_id)` triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleStream {
    pub title_key: String,
    /// `"main"` for movies, `"Sxx-Exx"` for episodes.
    pub stream_id: String,
    pub provider_id: String,
    /// Absolute (`http(s)://…`) or relative; relative paths are expanded
    /// against a provider's `streams_urls` at resolution time.
    pub proxy_url: String,
    pub last_updated: DateTime<Utc>,
}

impl TitleStream {
    pub fn document_key(&self) -> Option<(String, String, String)> {
        if self.title_key.trim().is_empty()
            || self.stream_id.trim().is_empty()
            || self.provider_id.trim().is_empty()
        {
            None
        } else {
            Some((
                self.title_key.clone(),
                self.stream_id.clone(),
                self.provider_id.clone(),
            ))
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.proxy_url.starts_with("http://") || self.proxy_url.starts_with("https://")
    }
}
