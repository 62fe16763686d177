//! Canonical key formats shared by every subsystem: `title_key`, `stream_id`,
//! and the Xtream/AGTV-specific encodings built on top of them.

use crate::error::{AppError, AppResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Movies,
    Tvshows,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Movies => "movies",
            ContentType::Tvshows => "tvshows",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movies" => Ok(ContentType::Movies),
            "tvshows" => Ok(ContentType::Tvshows),
            other => Err(AppError::upstream_permanent(format!(
                "unknown content type: {other}"
            ))),
        }
    }
}

/// `title_key = "{type}-{title_id}"`.
pub fn title_key(content_type: ContentType, title_id: &str) -> String {
    format!("{content_type}-{title_id}")
}

/// Splits a `title_key` back into its `(type, title_id)` parts.
pub fn parse_title_key(key: &str) -> AppResult<(ContentType, String)> {
    let (type_part, id_part) = key
        .split_once('-')
        .ok_or_else(|| AppError::upstream_permanent(format!("malformed title_key: {key}")))?;
    let content_type: ContentType = type_part.parse()?;
    Ok((content_type, id_part.to_string()))
}

static EPISODE_STREAM_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^S(\d{2})-E(\d{2})$").expect("static regex is valid"));

pub const MAIN_STREAM_ID: &str = "main";

/// `"main"` for movies, `"Sxx-Exx"` for episodes.
pub fn episode_stream_id(season: u32, episode: u32) -> String {
    format!("S{season:02}-E{episode:02}")
}

/// Parses `"Sxx-Exx"` back into `(season, episode)`. Rejects `"main"`.
pub fn parse_episode_stream_id(stream_id: &str) -> AppResult<(u32, u32)> {
    let captures = EPISODE_STREAM_ID
        .captures(stream_id)
        .ok_or_else(|| AppError::upstream_permanent(format!("malformed stream_id: {stream_id}")))?;
    let season: u32 = captures[1].parse().expect("regex guarantees digits");
    let episode: u32 = captures[2].parse().expect("regex guarantees digits");
    Ok((season, episode))
}

pub fn is_valid_stream_id(stream_id: &str) -> bool {
    stream_id == MAIN_STREAM_ID || EPISODE_STREAM_ID.is_match(stream_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_key_roundtrips() {
        let key = title_key(ContentType::Tvshows, "1399");
        assert_eq!(key, "tvshows-1399");
        let (content_type, id) = parse_title_key(&key).unwrap();
        assert_eq!(content_type, ContentType::Tvshows);
        assert_eq!(id, "1399");
    }

    #[test]
    fn episode_stream_id_roundtrips_for_all_valid_pairs() {
        for season in 1..=99u32 {
            for episode in 1..=99u32 {
                let encoded = episode_stream_id(season, episode);
                let (s, e) = parse_episode_stream_id(&encoded).unwrap();
                assert_eq!((s, e), (season, episode));
            }
        }
    }

    #[test]
    fn main_is_valid_but_not_an_episode_id() {
        assert!(is_valid_stream_id(MAIN_STREAM_ID));
        assert!(parse_episode_stream_id(MAIN_STREAM_ID).is_err());
    }

    #[test]
    fn rejects_malformed_stream_ids() {
        assert!(!is_valid_stream_id("S1-E2"));
        assert!(!is_valid_stream_id("season1"));
    }
}
