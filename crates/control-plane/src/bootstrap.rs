use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, RouterSettings, SystemConfig};
use crate::pg_repository::PgChannelRepository;
use crate::rate_limit::{
    CounterStoreError, LocalRateLimiter, RateLimiter, SharedRateLimitConfig, SharedRateLimiter,
};
use crate::redis_store::RedisCounterStore;
use crate::repository::{ChannelRepository, InMemoryChannelRepository, RepositoryError};
use crate::sqlite_repository::SqliteChannelRepository;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    CounterStore(#[from] CounterStoreError),
}

pub struct ControlPlaneBundle {
    pub settings: RouterSettings,
    pub repository: Arc<dyn ChannelRepository>,
    pub rate_limiter: Arc<dyn RateLimiter>,
}

impl ControlPlaneBundle {
    pub fn in_memory(settings: RouterSettings) -> Self {
        let rate_limiter = LocalRateLimiter::shared(settings.rate_limit_window);
        Self {
            settings,
            repository: InMemoryChannelRepository::shared(),
            rate_limiter,
        }
    }
}

/// Opens the durable store and picks the limiter strategy once, at startup.
///
/// Connecting to PostgreSQL blocks, so async callers should run this on a
/// blocking thread.
pub fn load_from_system_config(config: &SystemConfig) -> Result<ControlPlaneBundle, BootstrapError> {
    let settings = RouterSettings::from_config(config)?;
    let repository = resolve_repository(config)?;
    let rate_limiter = resolve_rate_limiter(&settings)?;
    Ok(ControlPlaneBundle {
        settings,
        repository,
        rate_limiter,
    })
}

pub fn resolve_repository(
    config: &SystemConfig,
) -> Result<Arc<dyn ChannelRepository>, RepositoryError> {
    let dsn = config.get_string("storage.dsn");
    if dsn.trim().is_empty() {
        let path = config.get_string("storage.sqlite_path");
        info!(path = %path, "using sqlite channel store");
        let repo = SqliteChannelRepository::open(&path)?;
        repo.ensure_schema()?;
        return Ok(Arc::new(repo));
    }
    if is_sqlite_dsn(&dsn) {
        let path = sqlite_path_from_dsn(&dsn);
        info!(path = %path, "using sqlite channel store");
        let repo = SqliteChannelRepository::open(path)?;
        repo.ensure_schema()?;
        return Ok(Arc::new(repo));
    }
    info!("using postgres channel store");
    let repo = PgChannelRepository::connect(&dsn)?;
    repo.ensure_schema()?;
    Ok(Arc::new(repo))
}

pub fn resolve_rate_limiter(
    settings: &RouterSettings,
) -> Result<Arc<dyn RateLimiter>, CounterStoreError> {
    let redis_url = match (&settings.redis_url, settings.distributed_rate_limit) {
        (Some(url), true) => url,
        _ => {
            info!("using process-local rate limiter");
            return Ok(LocalRateLimiter::shared(settings.rate_limit_window));
        }
    };
    info!("using shared rate limiter");
    let store = RedisCounterStore::open(redis_url)?;
    let config = SharedRateLimitConfig {
        key_prefix: settings.rate_limit_key_prefix.clone(),
        window: settings.rate_limit_window,
        timeout: settings.store_timeout,
    };
    Ok(Arc::new(SharedRateLimiter::new(Arc::new(store), config)))
}

fn is_sqlite_dsn(dsn: &str) -> bool {
    let trimmed = dsn.trim().to_lowercase();
    trimmed.starts_with("sqlite://") || trimmed.starts_with("sqlite:")
}

fn sqlite_path_from_dsn(dsn: &str) -> &str {
    dsn.trim()
        .strip_prefix("sqlite://")
        .or_else(|| dsn.trim().strip_prefix("sqlite:"))
        .unwrap_or(dsn)
}
