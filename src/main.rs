//! IPTV gateway: provider ingestion, TMDB matching, and best-source stream
//! resolution behind a thin stream-redirect edge.
//!
//! Features:
//! - Xtream/AGTV provider ingestion with TMDB metadata matching and caching
//! - Reservoir-style rate limiting per provider and for TMDB
//! - Recurring job scheduling with dependency gating and crash recovery
//! - Best-source stream resolution with liveness probing

use axum::{routing::get, Router};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cache;
mod config;
mod error;
mod export;
mod handlers;
mod ingestion;
mod middleware;
mod model;
mod providers;
mod rate_limiter;
mod repository;
mod resolver;
mod scheduler;
mod tmdb;

use crate::{
    cache::DiskCache,
    config::AppConfig,
    error::AppResult,
    handlers::{health_check, stream_episode, stream_movie, AppState},
    ingestion::IngestionPipeline,
    model::{ContentType, Provider, ProviderType},
    providers::ProviderAdapter,
    providers::{agtv::AgtvAdapter, xtream::XtreamAdapter},
    rate_limiter::{RateLimiterRegistry, ReservoirConfig},
    repository::{
        job_history::JobHistoryRepository, provider_titles::ProviderTitleRepository,
        providers::ProviderRepository, title_streams::TitleStreamRepository, titles::TitleRepository,
        Store,
    },
    resolver::StreamResolver,
    scheduler::{JobHandler, JobSpec, Scheduler},
    tmdb::TmdbClient,
};
use async_trait::async_trait;

#[tokio::main]
async fn main() -> AppResult<()> {
    init_tracing();
    info!("starting iptv gateway");

    let config = AppConfig::from_env()?;
    info!("configuration loaded");

    let store = Store::connect(&config.database_url).await?;
    info!("database connection established");

    let titles = TitleRepository::new(store.clone());
    let provider_titles = ProviderTitleRepository::new(store.clone());
    let title_streams = TitleStreamRepository::new(store.clone());
    let providers_repo = ProviderRepository::new(store.clone());
    let job_history = JobHistoryRepository::new(store.clone());

    let rate_limiters = Arc::new(RateLimiterRegistry::new(ReservoirConfig::tmdb_default()));
    let cache = DiskCache::new(config.cache_dir.clone());

    let tmdb = TmdbClient::new(
        config.tmdb_base_url.clone(),
        config.tmdb_api_key.clone(),
        rate_limiters.tmdb(),
        cache.clone(),
    );

    let pipeline = IngestionPipeline {
        titles: titles.clone(),
        provider_titles,
        title_streams: title_streams.clone(),
        tmdb,
        metadata_batch_size_xtream: config.metadata_batch_size_xtream,
        metadata_batch_size_agtv: config.metadata_batch_size_agtv,
    };

    let mut scheduler = Scheduler::new(job_history);
    scheduler.initialize().await?;
    register_ingestion_jobs(&mut scheduler, &providers_repo, &rate_limiters, &cache, &pipeline).await?;
    let scheduler = Arc::new(scheduler);
    scheduler.start();
    info!("scheduler started");

    let resolver = Arc::new(StreamResolver::new(title_streams, providers_repo, config.probe_timeout));
    let state = AppState { resolver };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/stream/movies/:title_id", get(stream_movie))
        .route("/api/stream/tvshows/:title_id/:season/:episode", get(stream_episode))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::compression_layer())
                .layer(axum::middleware::from_fn(middleware::add_request_id))
                .layer(axum::middleware::from_fn(middleware::add_security_headers)),
        );

    let addr: SocketAddr = config
        .server_address
        .parse()
        .map_err(|e| error::AppError::configuration(format!("invalid SERVER_ADDRESS: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "stream edge listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(store, scheduler))
        .await?;

    info!("server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,iptv_gateway=debug".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| log_level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wraps one `(provider, content_type)` ingestion pass as a schedulable job.
struct IngestionJob {
    pipeline: IngestionPipeline,
    provider: Provider,
    adapter: Arc<dyn ProviderAdapter>,
    content_type: ContentType,
}

#[async_trait]
impl JobHandler for IngestionJob {
    async fn run(&self) -> AppResult<Option<String>> {
        self.pipeline
            .run_provider_type(&self.provider, self.adapter.as_ref(), self.content_type)
            .await?;
        Ok(Some(format!("synced {} {}", self.provider.id, self.content_type)))
    }
}

/// One recurring job per `(provider, content_type)`, named
/// `sync:{provider_id}:{content_type}`, staggered by registration order so
/// startup doesn't fire every provider's first run in the same instant.
async fn register_ingestion_jobs(
    scheduler: &mut Scheduler,
    providers_repo: &ProviderRepository,
    rate_limiters: &Arc<RateLimiterRegistry>,
    cache: &DiskCache,
    pipeline: &IngestionPipeline,
) -> AppResult<()> {
    let providers = providers_repo.list_enabled_ordered_by_priority().await?;
    if providers.is_empty() {
        warn!("no enabled providers configured; ingestion scheduler is idle");
    }

    for (index, provider) in providers.iter().enumerate() {
        let rate_limiter = rate_limiters.provider(
            &provider.id,
            ReservoirConfig {
                concurrent: provider.api_rate.concurrent,
                duration_seconds: provider.api_rate.duration_seconds,
            },
        );

        let adapter: Arc<dyn ProviderAdapter> = match provider.provider_type {
            ProviderType::Xtream => Arc::new(XtreamAdapter::new(
                provider.id.clone(),
                provider.api_url.clone(),
                provider.username.clone(),
                provider.password.clone(),
                rate_limiter,
                cache.clone(),
            )),
            ProviderType::Agtv => Arc::new(AgtvAdapter::new(
                provider.id.clone(),
                provider.api_url.clone(),
                provider.username.clone(),
                provider.password.clone(),
                rate_limiter,
                cache.clone(),
            )),
        };

        for content_type in [ContentType::Movies, ContentType::Tvshows] {
            let name = format!("sync:{}:{}", provider.id, content_type);
            let spec = JobSpec::new(name.clone(), format!("ingest {} {}", provider.id, content_type))
                .with_interval(Duration::from_secs(3600))
                .with_delay(Duration::from_secs(index as u64 * 5));
            let handler = Arc::new(IngestionJob {
                pipeline: pipeline.clone(),
                provider: provider.clone(),
                adapter: adapter.clone(),
                content_type,
            });

            scheduler.register(spec, handler);
        }
    }

    Ok(())
}

async fn shutdown_signal(store: Store, scheduler: Arc<Scheduler>) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl+c, starting graceful shutdown"),
        _ = terminate => info!("received terminate signal, starting graceful shutdown"),
    }

    store.begin_stopping();
    scheduler.stop().await;
}
