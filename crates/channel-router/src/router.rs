use std::sync::Arc;
use std::time::Duration;

use control_plane::{
    AbilityTagUpdate, Channel, ChannelInfo, ChannelRepository, ChannelStatus, ControlPlaneBundle,
    RateLimiter, RouterSettings,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::abilities::{AbilityService, RepairReport};
use crate::cache::{CacheStats, RoutingCache};
use crate::error::RouterError;
use crate::group::{AutoGroupResolver, GroupSelector};
use crate::selector::SelectionEngine;
use crate::store::with_store;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterConfig {
    pub memory_cache_enabled: bool,
    pub sync_frequency: Duration,
    pub auto_groups: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::from(&RouterSettings::default())
    }
}

impl From<&RouterSettings> for RouterConfig {
    fn from(settings: &RouterSettings) -> Self {
        Self {
            memory_cache_enabled: settings.memory_cache_enabled,
            sync_frequency: settings.sync_frequency,
            auto_groups: settings.auto_groups.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChannelSelection {
    pub channel: Arc<Channel>,
    /// The concrete group the channel was found in; differs from the request
    /// only for `auto`.
    pub group: String,
}

/// Entry point used by request handlers and configuration hooks.
pub struct ChannelRouter {
    config: RouterConfig,
    repo: Arc<dyn ChannelRepository>,
    cache: Option<Arc<RoutingCache>>,
    engine: SelectionEngine,
    resolver: AutoGroupResolver,
    abilities: AbilityService,
}

impl ChannelRouter {
    pub fn new(
        config: RouterConfig,
        repo: Arc<dyn ChannelRepository>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        let cache = config.memory_cache_enabled.then(RoutingCache::shared);
        Self {
            resolver: AutoGroupResolver::new(config.auto_groups.clone()),
            abilities: AbilityService::new(repo.clone()),
            engine: SelectionEngine::new(rate_limiter),
            config,
            repo,
            cache,
        }
    }

    pub fn from_bundle(bundle: ControlPlaneBundle) -> Self {
        Self::new(
            RouterConfig::from(&bundle.settings),
            bundle.repository,
            bundle.rate_limiter,
        )
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&Arc<RoutingCache>> {
        self.cache.as_ref()
    }

    pub fn repository(&self) -> &Arc<dyn ChannelRepository> {
        &self.repo
    }

    /// Builds the routing cache. A no-op returning `None` when the cache is
    /// disabled.
    pub async fn init_cache(&self) -> Result<Option<CacheStats>, RouterError> {
        let Some(cache) = &self.cache else {
            debug!("memory cache disabled, routing from store");
            return Ok(None);
        };
        let stats = rebuild(cache, &self.repo).await?;
        Ok(Some(stats))
    }

    /// Rebuilds the cache every `interval` until the handle is aborted. A
    /// failed rebuild keeps the previous index.
    pub fn start_periodic_sync(&self, interval: Duration) -> Option<JoinHandle<()>> {
        let cache = self.cache.clone()?;
        let repo = self.repo.clone();
        info!(interval_secs = interval.as_secs(), "starting routing cache sync");
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                debug!("syncing routing cache from store");
                if let Err(err) = rebuild(&cache, &repo).await {
                    warn!(error = %err, "routing cache sync failed, keeping previous snapshot");
                }
            }
        }))
    }

    /// Picks one channel for `model` in `group` (or the `auto` groups) on the
    /// priority tier selected by `retry`.
    pub async fn select_channel(
        &self,
        group: &str,
        model: &str,
        retry: usize,
    ) -> Result<ChannelSelection, RouterError> {
        let selector = GroupSelector::parse(group);
        let (channel, group) = self
            .resolver
            .resolve(&selector, model, move |group| async move {
                self.select_in_group(&group, model, retry).await
            })
            .await?;
        Ok(ChannelSelection { channel, group })
    }

    async fn select_in_group(
        &self,
        group: &str,
        model: &str,
        retry: usize,
    ) -> Result<Arc<Channel>, RouterError> {
        match &self.cache {
            Some(cache) => self.engine.select_cached(cache, group, model, retry).await,
            None => {
                self.engine
                    .select_direct(&self.repo, group, model, retry)
                    .await
            }
        }
    }

    /// Enabled channel by id; disabled channels are reported as such.
    pub async fn get_channel(&self, channel_id: i64) -> Result<Arc<Channel>, RouterError> {
        let channel = match &self.cache {
            Some(cache) => cache.get_channel(channel_id),
            None => with_store(&self.repo, move |repo| repo.get_channel(channel_id))
                .await?
                .map(Arc::new),
        };
        let Some(channel) = channel else {
            return Err(RouterError::ChannelNotFound(channel_id));
        };
        if !channel.is_enabled() {
            return Err(RouterError::ChannelDisabled(channel_id));
        }
        Ok(channel)
    }

    pub async fn get_channel_info(&self, channel_id: i64) -> Result<ChannelInfo, RouterError> {
        let channel = self.get_channel(channel_id).await?;
        Ok(channel.info.clone())
    }

    /// Regenerates the channel's abilities, then refreshes the cache.
    pub async fn on_channel_saved(&self, channel: &Channel) -> Result<(), RouterError> {
        let written = self.abilities.sync_channel(channel).await?;
        debug!(channel_id = channel.id, abilities = written, "channel abilities regenerated");
        if let Some(cache) = &self.cache {
            rebuild(cache, &self.repo).await?;
        }
        Ok(())
    }

    /// Removes the channel's abilities and drops it from the cached channel
    /// map. Route lists naming it are cleaned up by the next sync.
    pub async fn on_channel_deleted(&self, channel_id: i64) -> Result<(), RouterError> {
        let removed = self.abilities.delete_channel(channel_id).await?;
        debug!(channel_id, abilities = removed, "channel abilities removed");
        if let Some(cache) = &self.cache {
            cache.remove_channel(channel_id);
        }
        Ok(())
    }

    /// Persists a status change and mirrors it into the cached record without
    /// a rebuild.
    pub async fn set_channel_status(
        &self,
        channel_id: i64,
        status: ChannelStatus,
    ) -> Result<(), RouterError> {
        if !self.abilities.set_channel_status(channel_id, status).await? {
            return Err(RouterError::ChannelNotFound(channel_id));
        }
        if let Some(cache) = &self.cache {
            cache.update_status(channel_id, status);
        }
        info!(channel_id, status = status.code(), "channel status changed");
        Ok(())
    }

    pub async fn set_ability_status_by_tag(
        &self,
        tag: &str,
        enabled: bool,
    ) -> Result<usize, RouterError> {
        self.abilities.set_status_by_tag(tag, enabled).await
    }

    pub async fn update_abilities_by_tag(
        &self,
        tag: &str,
        update: AbilityTagUpdate,
    ) -> Result<usize, RouterError> {
        self.abilities.update_by_tag(tag, update).await
    }

    /// Regenerates every ability and then rebuilds the cache. A rebuild
    /// failure is logged; the repair counts are still returned.
    pub async fn repair_abilities(&self) -> Result<RepairReport, RouterError> {
        let report = self.abilities.repair().await?;
        if let Some(cache) = &self.cache {
            if let Err(err) = rebuild(cache, &self.repo).await {
                warn!(error = %err, "routing cache rebuild after repair failed");
            }
        }
        Ok(report)
    }

    pub async fn enabled_models(&self, group: Option<&str>) -> Result<Vec<String>, RouterError> {
        let group = group.map(str::to_string);
        with_store(&self.repo, move |repo| repo.enabled_models(group.as_deref())).await
    }

    pub fn usage(&self, channel_id: i64) -> u64 {
        self.engine.rate_limiter().usage(channel_id)
    }
}

async fn rebuild(
    cache: &Arc<RoutingCache>,
    repo: &Arc<dyn ChannelRepository>,
) -> Result<CacheStats, RouterError> {
    let cache = cache.clone();
    with_store(repo, move |repo| cache.rebuild(repo)).await
}
