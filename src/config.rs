//! Process-wide configuration, loaded once at startup from the environment.
//!
//! Validation happens eagerly here: a missing TMDB key or a zero-valued rate
//! limit is a `ConfigurationError` raised before any subsystem starts, rather
//! than discovered lazily on first use.

use crate::error::{AppError, AppResult};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_address: String,
    pub database_url: String,
    pub cache_dir: PathBuf,

    pub tmdb_api_key: String,
    pub tmdb_base_url: String,

    pub default_rate_concurrent: u32,
    pub default_rate_duration: Duration,

    pub metadata_batch_size_xtream: usize,
    pub metadata_batch_size_agtv: usize,
    pub existence_batch_size: usize,

    pub probe_timeout: Duration,
    pub progress_save_interval: Duration,

    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        dotenv::dotenv().ok();

        let server_address =
            env::var("SERVER_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./iptv-gateway.db".to_string());

        let cache_dir = env::var("CACHE_DIR")
            .unwrap_or_else(|_| "./cache".to_string())
            .into();

        let tmdb_api_key = env::var("TMDB_API_KEY")
            .map_err(|_| AppError::configuration("TMDB_API_KEY environment variable is required"))?;

        let tmdb_base_url = env::var("TMDB_BASE_URL")
            .unwrap_or_else(|_| "https://api.themoviedb.org/3".to_string());

        let default_rate_concurrent = parse_env_u32("PROVIDER_RATE_CONCURRENT", 5)?;
        let default_rate_duration =
            Duration::from_secs(parse_env_u64("PROVIDER_RATE_DURATION_SECONDS", 1)?);

        let metadata_batch_size_xtream =
            parse_env_u32("METADATA_BATCH_SIZE_XTREAM", 100)? as usize;
        let metadata_batch_size_agtv = parse_env_u32("METADATA_BATCH_SIZE_AGTV", 500)? as usize;
        let existence_batch_size = parse_env_u32("EXISTENCE_BATCH_SIZE", 1000)? as usize;

        let probe_timeout = Duration::from_millis(parse_env_u64("PROBE_TIMEOUT_MS", 7500)?);
        let progress_save_interval =
            Duration::from_secs(parse_env_u64("PROGRESS_SAVE_INTERVAL_SECONDS", 30)?);

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let config = Self {
            server_address,
            database_url,
            cache_dir,
            tmdb_api_key,
            tmdb_base_url,
            default_rate_concurrent,
            default_rate_duration,
            metadata_batch_size_xtream,
            metadata_batch_size_agtv,
            existence_batch_size,
            probe_timeout,
            progress_save_interval,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.tmdb_api_key.is_empty() {
            return Err(AppError::configuration("TMDB API key cannot be empty"));
        }
        if self.default_rate_concurrent == 0 {
            return Err(AppError::configuration(
                "PROVIDER_RATE_CONCURRENT must be greater than 0",
            ));
        }
        if self.default_rate_duration.is_zero() {
            return Err(AppError::configuration(
                "PROVIDER_RATE_DURATION_SECONDS must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u32>()
            .map_err(|_| AppError::configuration(format!("{name} must be a valid number"))),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|_| AppError::configuration(format!("{name} must be a valid number"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
impl AppConfig {
    pub fn test_config() -> Self {
        Self {
            server_address: "127.0.0.1:0".to_string(),
            database_url: "sqlite::memory:".to_string(),
            cache_dir: std::env::temp_dir().join("iptv-gateway-test-cache"),
            tmdb_api_key: "test_api_key".to_string(),
            tmdb_base_url: "https://api.themoviedb.org/3".to_string(),
            default_rate_concurrent: 5,
            default_rate_duration: Duration::from_secs(1),
            metadata_batch_size_xtream: 100,
            metadata_batch_size_agtv: 500,
            existence_batch_size: 1000,
            probe_timeout: Duration::from_millis(7500),
            progress_save_interval: Duration::from_secs(30),
            log_level: "debug".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validates() {
        assert!(AppConfig::test_config().validate().is_ok());
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let mut config = AppConfig::test_config();
        config.tmdb_api_key.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_rate_concurrent_is_rejected() {
        let mut config = AppConfig::test_config();
        config.default_rate_concurrent = 0;
        assert!(config.validate().is_err());
    }
}
