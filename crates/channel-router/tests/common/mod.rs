#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use channel_router::{ChannelRouter, RouterConfig};
use control_plane::{
    Ability, AbilityTagUpdate, Channel, ChannelRepository, ChannelStatus, InMemoryChannelRepository,
    LocalRateLimiter, RepositoryError,
};

pub fn channel(id: i64, models: &str, groups: &str, priority: i64, weight: u32) -> Channel {
    let mut channel = Channel::new(id, format!("channel-{id}"), models, groups);
    channel.priority = Some(priority);
    channel.weight = Some(weight);
    channel
}

pub fn seeded(channels: &[Channel]) -> Arc<InMemoryChannelRepository> {
    let repo = InMemoryChannelRepository::shared();
    for channel in channels {
        repo.upsert_channel(channel).expect("upsert");
        repo.replace_channel_abilities(channel.id, &channel.abilities())
            .expect("abilities");
    }
    repo
}

pub fn config(memory_cache_enabled: bool, auto_groups: &[&str]) -> RouterConfig {
    RouterConfig {
        memory_cache_enabled,
        auto_groups: auto_groups.iter().map(|g| g.to_string()).collect(),
        ..RouterConfig::default()
    }
}

pub async fn router(
    repo: Arc<dyn ChannelRepository>,
    memory_cache_enabled: bool,
    auto_groups: &[&str],
) -> ChannelRouter {
    let router = ChannelRouter::new(
        config(memory_cache_enabled, auto_groups),
        repo,
        LocalRateLimiter::shared(Duration::from_secs(60)),
    );
    router.init_cache().await.expect("init cache");
    router
}

/// Delegating store with switches for injected failures and latency.
#[derive(Default)]
pub struct FaultyRepository {
    pub inner: InMemoryChannelRepository,
    pub fail_reads: AtomicBool,
    pub drop_tiers: AtomicBool,
    pub slow_scans: AtomicBool,
}

impl FaultyRepository {
    pub fn wrap(inner: &InMemoryChannelRepository) -> Arc<Self> {
        Arc::new(Self {
            inner: inner.clone(),
            ..Self::default()
        })
    }

    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<(), RepositoryError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RepositoryError::Store("store offline".to_string()));
        }
        Ok(())
    }
}

impl ChannelRepository for FaultyRepository {
    fn all_channels(&self) -> Result<Vec<Channel>, RepositoryError> {
        self.check_reads()?;
        if self.slow_scans.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(200));
        }
        self.inner.all_channels()
    }

    fn get_channel(&self, id: i64) -> Result<Option<Channel>, RepositoryError> {
        self.check_reads()?;
        self.inner.get_channel(id)
    }

    fn upsert_channel(&self, channel: &Channel) -> Result<(), RepositoryError> {
        self.inner.upsert_channel(channel)
    }

    fn delete_channel(&self, id: i64) -> Result<bool, RepositoryError> {
        self.inner.delete_channel(id)
    }

    fn update_channel_status(
        &self,
        id: i64,
        status: ChannelStatus,
    ) -> Result<bool, RepositoryError> {
        self.inner.update_channel_status(id, status)
    }

    fn all_abilities(&self) -> Result<Vec<Ability>, RepositoryError> {
        self.check_reads()?;
        self.inner.all_abilities()
    }

    fn enabled_abilities(&self, group: &str, model: &str) -> Result<Vec<Ability>, RepositoryError> {
        self.check_reads()?;
        self.inner.enabled_abilities(group, model)
    }

    fn enabled_priorities(&self, group: &str, model: &str) -> Result<Vec<i64>, RepositoryError> {
        self.check_reads()?;
        self.inner.enabled_priorities(group, model)
    }

    fn enabled_abilities_at_priority(
        &self,
        group: &str,
        model: &str,
        priority: i64,
    ) -> Result<Vec<Ability>, RepositoryError> {
        self.check_reads()?;
        if self.drop_tiers.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        self.inner.enabled_abilities_at_priority(group, model, priority)
    }

    fn enabled_models(&self, group: Option<&str>) -> Result<Vec<String>, RepositoryError> {
        self.check_reads()?;
        self.inner.enabled_models(group)
    }

    fn insert_abilities(&self, abilities: &[Ability]) -> Result<usize, RepositoryError> {
        self.inner.insert_abilities(abilities)
    }

    fn replace_channel_abilities(
        &self,
        channel_id: i64,
        abilities: &[Ability],
    ) -> Result<(), RepositoryError> {
        self.inner.replace_channel_abilities(channel_id, abilities)
    }

    fn delete_channel_abilities(&self, channel_ids: &[i64]) -> Result<usize, RepositoryError> {
        self.inner.delete_channel_abilities(channel_ids)
    }

    fn update_ability_status(
        &self,
        channel_id: i64,
        enabled: bool,
    ) -> Result<usize, RepositoryError> {
        self.inner.update_ability_status(channel_id, enabled)
    }

    fn update_ability_status_by_tag(
        &self,
        tag: &str,
        enabled: bool,
    ) -> Result<usize, RepositoryError> {
        self.inner.update_ability_status_by_tag(tag, enabled)
    }

    fn update_abilities_by_tag(
        &self,
        tag: &str,
        update: &AbilityTagUpdate,
    ) -> Result<usize, RepositoryError> {
        self.inner.update_abilities_by_tag(tag, update)
    }
}
