//! Xtream re-export projections (§4.9, §6.2).

use crate::model::ContentType;
use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_EXTENSION: &str = "mp4";

/// `/movie/{username}/{password}/{stream_id}.{ext}`; series equivalent with
/// `/series`. `password` here is the user's `api_key`, not their real
/// password — Xtream clients authenticate against the re-export surface
/// with the api key in the password slot.
pub fn stream_path(
    content_type: ContentType,
    username: &str,
    api_key: &str,
    stream_id: &str,
    extension: Option<&str>,
) -> String {
    let segment = match content_type {
        ContentType::Movies => "movie",
        ContentType::Tvshows => "series",
    };
    let extension = extension.unwrap_or(DEFAULT_EXTENSION);
    format!("/{segment}/{username}/{api_key}/{stream_id}.{extension}")
}

/// `"tvshows-{title_id}-{season}-{episode}.mp4"`, the series-variant stream
/// id handed out in Xtream series payloads (`stream_id` field).
pub fn build_series_stream_id(title_id: &str, season: u32, episode: u32) -> String {
    format!("tvshows-{title_id}-{season}-{episode}.{DEFAULT_EXTENSION}")
}

static SERIES_STREAM_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:tvshows-)?(.+)-(\d+)-(\d+)\.mp4$").expect("valid regex"));

/// Inverse of `build_series_stream_id`. Accepts both the `"tvshows-"`-
/// prefixed form and the bare `"{title_id}-{season}-{episode}.mp4"` form;
/// `title_id` may itself contain dashes, so the last two dash-separated
/// numeric segments are taken as season/episode.
pub fn parse_series_stream_id(raw: &str) -> Option<(String, u32, u32)> {
    let captures = SERIES_STREAM_ID.captures(raw)?;
    let title_id = captures[1].to_string();
    let season: u32 = captures[2].parse().ok()?;
    let episode: u32 = captures[3].parse().ok()?;
    Some((title_id, season, episode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movie_path_uses_movie_segment_and_default_extension() {
        assert_eq!(
            stream_path(ContentType::Movies, "alice", "key123", "42", None),
            "/movie/alice/key123/42.mp4"
        );
    }

    #[test]
    fn series_path_uses_series_segment_and_explicit_extension() {
        assert_eq!(
            stream_path(ContentType::Tvshows, "alice", "key123", "S01-E02", Some("mkv")),
            "/series/alice/key123/S01-E02.mkv"
        );
    }

    #[test]
    fn builds_the_tvshows_prefixed_form() {
        assert_eq!(build_series_stream_id("tt0903747", 1, 1), "tvshows-tt0903747-1-1.mp4");
    }

    #[test]
    fn round_trips_through_build_and_parse() {
        for season in 1..=3u32 {
            for episode in 1..=3u32 {
                let built = build_series_stream_id("tt0903747", season, episode);
                assert_eq!(parse_series_stream_id(&built), Some(("tt0903747".to_string(), season, episode)));
            }
        }
    }

    #[test]
    fn parses_the_tvshows_prefixed_form() {
        assert_eq!(
            parse_series_stream_id("tvshows-tt0903747-2-3.mp4"),
            Some(("tt0903747".to_string(), 2, 3))
        );
    }

    #[test]
    fn parses_the_bare_form() {
        assert_eq!(
            parse_series_stream_id("tt0903747-2-3.mp4"),
            Some(("tt0903747".to_string(), 2, 3))
        );
    }

    #[test]
    fn title_ids_may_contain_dashes_themselves() {
        assert_eq!(
            parse_series_stream_id("tvshows-some-show-id-2-3.mp4"),
            Some(("some-show-id".to_string(), 2, 3))
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse_series_stream_id("not-a-stream-id"), None);
    }
}
