pub mod bootstrap;
pub mod channel;
pub mod config;
pub mod pg_repository;
pub mod rate_limit;
pub mod redis_store;
pub mod repository;
pub mod sqlite_repository;
pub mod static_config;

pub use bootstrap::{
    load_from_system_config, resolve_rate_limiter, resolve_repository, BootstrapError,
    ControlPlaneBundle,
};
pub use channel::{
    Ability, AbilityTagUpdate, Channel, ChannelInfo, ChannelStatus, MultiKeyMode,
};
pub use config::{default_config_toml, ConfigError, RouterSettings, SystemConfig, SystemConfigLoader};
pub use pg_repository::PgChannelRepository;
pub use rate_limit::{
    CounterStore, CounterStoreError, InMemoryCounterStore, LocalRateLimiter, RateDecision,
    RateLimiter, SharedRateLimitConfig, SharedRateLimiter, DEFAULT_WINDOW,
};
pub use redis_store::RedisCounterStore;
pub use repository::{
    ChannelRepository, InMemoryChannelRepository, RepositoryError, ABILITY_BATCH_SIZE,
};
pub use sqlite_repository::SqliteChannelRepository;
