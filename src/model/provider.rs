//! Provider configuration entity: managed externally (settings CRUD is out
//! of scope), read by the ingestion pipeline, rate limiter, and resolver.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Xtream,
    Agtv,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Xtream => "xtream",
            ProviderType::Agtv => "agtv",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ApiRate {
    pub concurrent: u32,
    pub duration_seconds: u64,
}

/// `priority`: lower sorts first (resolver candidate order, ingestion run
/// order). Missing priority sorts last at `999` per §4.8.
pub const DEFAULT_PRIORITY: i32 = 999;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub provider_type: ProviderType,
    pub enabled: bool,
    pub deleted: bool,
    pub priority: i32,
    pub api_url: String,
    pub username: String,
    pub password: String,
    /// Ordered base URLs for relative `proxy_url` expansion. At most one
    /// entry for non-Xtream providers.
    pub streams_urls: Vec<String>,
    pub api_rate: ApiRate,
}

impl Provider {
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.deleted
    }
}
