//! Stream resolver (C8): picks a live, reachable upstream URL for a given
//! `(title_id, type, season?, episode?)` across providers, ranked by
//! priority with liveness probing.

use crate::error::AppResult;
use crate::model::{episode_stream_id, title_key, ContentType, Provider, ProviderType, MAIN_STREAM_ID};
use crate::repository::providers::ProviderRepository;
use crate::repository::title_streams::TitleStreamRepository;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct Candidate {
    url: String,
    provider_type: ProviderType,
}

pub struct StreamResolver {
    title_streams: TitleStreamRepository,
    providers: ProviderRepository,
    probe_timeout: Duration,
    http: reqwest::Client,
}

impl StreamResolver {
    pub fn new(title_streams: TitleStreamRepository, providers: ProviderRepository, probe_timeout: Duration) -> Self {
        Self {
            title_streams,
            providers,
            probe_timeout,
            http: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .expect("client config is valid"),
        }
    }

    pub async fn get_best_source(
        &self,
        title_id: &str,
        content_type: ContentType,
        season: Option<u32>,
        episode: Option<u32>,
    ) -> AppResult<Option<String>> {
        let stream_id = match (season, episode) {
            (Some(season), Some(episode)) => episode_stream_id(season, episode),
            _ => MAIN_STREAM_ID.to_string(),
        };
        let key = title_key(content_type, title_id);

        let rows = self.title_streams.find_for_title_and_stream(&key, &stream_id).await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let providers: HashMap<String, Provider> = self
            .providers
            .list_enabled_ordered_by_priority()
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        let rows = sort_by_provider_priority(rows, &providers);

        for row in rows {
            let Some(provider) = providers.get(&row.provider_id) else { continue };
            let candidates = self.build_candidates(provider, &row.proxy_url);
            for candidate in candidates {
                if self.probe(&candidate).await {
                    return Ok(Some(candidate.url));
                }
            }
        }
        Ok(None)
    }

    fn build_candidates(&self, provider: &Provider, proxy_url: &str) -> Vec<Candidate> {
        if proxy_url.starts_with("http://") || proxy_url.starts_with("https://") {
            return vec![Candidate {
                url: proxy_url.to_string(),
                provider_type: provider.provider_type,
            }];
        }
        if let Some(path) = proxy_url.strip_prefix('/') {
            if provider.streams_urls.is_empty() {
                warn!(provider = %provider.id, proxy_url, "no base URLs configured, emitting relative path");
                return vec![Candidate {
                    url: proxy_url.to_string(),
                    provider_type: provider.provider_type,
                }];
            }
            return provider
                .streams_urls
                .iter()
                .map(|base| Candidate {
                    url: format!("{}/{}", base.trim_end_matches('/'), path),
                    provider_type: provider.provider_type,
                })
                .collect();
        }
        warn!(provider = %provider.id, proxy_url, "proxy_url has no scheme or leading slash");
        vec![Candidate {
            url: proxy_url.to_string(),
            provider_type: provider.provider_type,
        }]
    }

    async fn probe(&self, candidate: &Candidate) -> bool {
        let result = tokio::time::timeout(self.probe_timeout, self.probe_inner(candidate)).await;
        match result {
            Ok(Ok(true)) => true,
            Ok(Ok(false)) => false,
            Ok(Err(err)) => {
                debug!(url = %candidate.url, %err, "probe request failed");
                false
            }
            Err(_) => {
                debug!(url = %candidate.url, "probe timed out");
                false
            }
        }
    }

    async fn probe_inner(&self, candidate: &Candidate) -> Result<bool, reqwest::Error> {
        match candidate.provider_type {
            ProviderType::Agtv => {
                let response = self.http.head(&candidate.url).send().await?;
                Ok(response.status().is_success())
            }
            ProviderType::Xtream => self.probe_with_redirects(&candidate.url, 3).await,
        }
    }

    /// GET, following at most `max_redirects` relative/absolute redirects,
    /// reading only the first chunk of the body before closing the
    /// connection. Succeeds iff the final status is in `[200,400)`.
    async fn probe_with_redirects(&self, url: &str, max_redirects: u32) -> Result<bool, reqwest::Error> {
        let mut current = url.to_string();
        for _ in 0..=max_redirects {
            let response = self.http.get(&current).send().await?;
            let status = response.status();
            if status.is_redirection() {
                if let Some(location) = response.headers().get(reqwest::header::LOCATION) {
                    if let Ok(location) = location.to_str() {
                        current = resolve_redirect(&current, location);
                        continue;
                    }
                }
                return Ok(false);
            }
            let mut stream = response;
            let _ = stream.chunk().await;
            return Ok((200..400).contains(&status.as_u16()));
        }
        Ok(false)
    }
}

/// §4.8 ordering & tie-break: provider priority (ascending, missing provider
/// last) is the ordering authority, not repository insertion order.
fn sort_by_provider_priority(
    mut rows: Vec<crate::model::TitleStream>,
    providers: &HashMap<String, Provider>,
) -> Vec<crate::model::TitleStream> {
    rows.sort_by_key(|row| providers.get(&row.provider_id).map_or(i32::MAX, |p| p.priority));
    rows
}

fn resolve_redirect(base: &str, location: &str) -> String {
    match url::Url::parse(base).and_then(|base| base.join(location)) {
        Ok(joined) => joined.to_string(),
        Err(_) => location.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ApiRate;

    fn provider(id: &str, streams_urls: Vec<&str>, provider_type: ProviderType) -> Provider {
        Provider {
            id: id.to_string(),
            provider_type,
            enabled: true,
            deleted: false,
            priority: 1,
            api_url: "https://example.com".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            streams_urls: streams_urls.into_iter().map(str::to_string).collect(),
            api_rate: ApiRate { concurrent: 5, duration_seconds: 1 },
        }
    }

    async fn test_resolver() -> StreamResolver {
        let providers = ProviderRepository::new(crate::repository::Store::connect_test().await.unwrap());
        let title_streams = TitleStreamRepository::new(crate::repository::Store::connect_test().await.unwrap());
        StreamResolver::new(title_streams, providers, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn absolute_proxy_url_is_a_single_candidate() {
        let resolver = test_resolver().await;
        let p = provider("a", vec!["https://a"], ProviderType::Xtream);
        let candidates = resolver.build_candidates(&p, "http://direct.example.com/x.mp4");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "http://direct.example.com/x.mp4");
    }

    #[tokio::test]
    async fn relative_proxy_url_expands_against_every_base() {
        let resolver = test_resolver().await;
        let p = provider("a", vec!["https://a/", "https://b"], ProviderType::Xtream);
        let candidates = resolver.build_candidates(&p, "/s/55/2/3.mp4");
        assert_eq!(
            candidates.iter().map(|c| c.url.clone()).collect::<Vec<_>>(),
            vec!["https://a/s/55/2/3.mp4".to_string(), "https://b/s/55/2/3.mp4".to_string()]
        );
    }

    #[tokio::test]
    async fn relative_proxy_url_with_no_base_urls_degrades_to_the_relative_path() {
        let resolver = test_resolver().await;
        let p = provider("a", vec![], ProviderType::Agtv);
        let candidates = resolver.build_candidates(&p, "/s/55/2/3.mp4");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "/s/55/2/3.mp4");
    }

    #[test]
    fn rows_are_ordered_by_provider_priority_not_insertion_order() {
        let mut providers = HashMap::new();
        providers.insert("b".to_string(), provider("b", vec!["https://b"], ProviderType::Xtream));
        let mut low_priority_a = provider("a", vec!["https://a"], ProviderType::Xtream);
        low_priority_a.priority = 1;
        providers.get_mut("b").unwrap().priority = 2;
        providers.insert("a".to_string(), low_priority_a);

        let row = |provider_id: &str| crate::model::TitleStream {
            title_key: "tvshows-55".to_string(),
            stream_id: "S02-E03".to_string(),
            provider_id: provider_id.to_string(),
            proxy_url: "/s/55/2/3.mp4".to_string(),
            last_updated: chrono::Utc::now(),
        };

        // Row for "b" (priority 2) was inserted before "a" (priority 1).
        let rows = vec![row("b"), row("a")];
        let sorted = sort_by_provider_priority(rows, &providers);
        assert_eq!(sorted[0].provider_id, "a");
        assert_eq!(sorted[1].provider_id, "b");
    }

    #[test]
    fn redirect_resolution_handles_relative_locations() {
        assert_eq!(
            resolve_redirect("https://a.example.com/x/y", "/z"),
            "https://a.example.com/z"
        );
        assert_eq!(
            resolve_redirect("https://a.example.com/x/y", "https://b.example.com/q"),
            "https://b.example.com/q"
        );
    }
}
