//! Stremio re-export projections (§4.9, §6.2).

use once_cell::sync::Lazy;
use regex::Regex;

/// `{title_id}-S{season:02}-E{episode:02}`.
pub fn episode_id(title_id: &str, season: u32, episode: u32) -> String {
    format!("{title_id}-S{season:02}-E{episode:02}")
}

static DASH_FORM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+)-S(\d{2})-E(\d{2})$").expect("valid regex"));
static COLON_FORM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+):(\d+):(\d+)$").expect("valid regex"));

/// Parses a Stremio meta/stream id into `(title_id, season/episode)`.
/// Accepts the dash form (`"{id}-S{s:02}-E{e:02}"`), the colon form
/// (`"{id}:{s}:{e}"`), or a bare id (movie, no season/episode).
pub fn parse_id(raw: &str) -> (String, Option<(u32, u32)>) {
    if let Some(captures) = DASH_FORM.captures(raw) {
        let title_id = captures[1].to_string();
        let season: u32 = captures[2].parse().expect("regex guarantees digits");
        let episode: u32 = captures[3].parse().expect("regex guarantees digits");
        return (title_id, Some((season, episode)));
    }
    if let Some(captures) = COLON_FORM.captures(raw) {
        let title_id = captures[1].to_string();
        if let (Ok(season), Ok(episode)) = (captures[2].parse(), captures[3].parse()) {
            return (title_id, Some((season, episode)));
        }
    }
    (raw.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_dash_form_episode_ids() {
        assert_eq!(episode_id("tt0903747", 1, 1), "tt0903747-S01-E01");
    }

    #[test]
    fn parses_dash_form() {
        assert_eq!(parse_id("tt0903747-S01-E01"), ("tt0903747".to_string(), Some((1, 1))));
    }

    #[test]
    fn parses_colon_form() {
        assert_eq!(parse_id("tt0903747:1:1"), ("tt0903747".to_string(), Some((1, 1))));
    }

    #[test]
    fn bare_id_is_a_movie() {
        assert_eq!(parse_id("603"), ("603".to_string(), None));
    }

    #[test]
    fn ids_may_contain_dashes_themselves() {
        assert_eq!(
            parse_id("some-show-id-S02-E10"),
            ("some-show-id".to_string(), Some((2, 10)))
        );
    }
}
