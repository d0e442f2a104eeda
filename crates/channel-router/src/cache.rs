use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use control_plane::{Ability, Channel, ChannelRepository, ChannelStatus, RepositoryError};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    pub channel_id: i64,
    pub priority: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub groups: usize,
    pub routes: usize,
    pub channels: usize,
}

/// One cached route joined with the channel record it points at. `channel`
/// is `None` when the route outlived its channel.
#[derive(Clone, Debug)]
pub struct CachedCandidate {
    pub route: RouteEntry,
    pub channel: Option<Arc<Channel>>,
}

/// Immutable index built from one full read of the store.
#[derive(Clone, Debug, Default)]
pub struct CacheSnapshot {
    routes: HashMap<String, HashMap<String, Vec<RouteEntry>>>,
    channels: HashMap<i64, Arc<Channel>>,
    skipped: usize,
}

impl CacheSnapshot {
    /// Indexes enabled abilities of enabled channels. Each route list is
    /// ordered by descending effective priority.
    pub fn build(channels: Vec<Channel>, abilities: Vec<Ability>) -> Self {
        let channels: HashMap<i64, Arc<Channel>> = channels
            .into_iter()
            .map(|channel| (channel.id, Arc::new(channel)))
            .collect();
        let mut routes: HashMap<String, HashMap<String, Vec<RouteEntry>>> = HashMap::new();
        let mut skipped = 0;

        for ability in abilities {
            if !ability.enabled {
                continue;
            }
            let Some(channel) = channels.get(&ability.channel_id) else {
                skipped += 1;
                continue;
            };
            if !channel.is_enabled() {
                continue;
            }
            let priority = ability.effective_priority(Some(channel));
            routes
                .entry(ability.group)
                .or_default()
                .entry(ability.model)
                .or_default()
                .push(RouteEntry {
                    channel_id: ability.channel_id,
                    priority,
                });
        }

        for models in routes.values_mut() {
            for entries in models.values_mut() {
                entries.sort_by_key(|entry| (Reverse(entry.priority), entry.channel_id));
            }
        }

        Self {
            routes,
            channels,
            skipped,
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            groups: self.routes.len(),
            routes: self.routes.values().map(|models| models.len()).sum(),
            channels: self.channels.len(),
        }
    }

    /// Abilities dropped because their channel row is gone.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// In-memory group → model → channel index used by the selection hot path.
///
/// Readers never observe a half-built index: rebuilds construct a fresh
/// [`CacheSnapshot`] without holding the lock and swap it in.
#[derive(Default)]
pub struct RoutingCache {
    state: RwLock<CacheSnapshot>,
}

impl RoutingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Reads every channel and ability and replaces the index. On failure the
    /// previous index stays in place.
    pub fn rebuild(&self, repo: &dyn ChannelRepository) -> Result<CacheStats, RepositoryError> {
        let channels = repo.all_channels()?;
        let abilities = repo.all_abilities()?;
        let snapshot = CacheSnapshot::build(channels, abilities);
        if snapshot.skipped() > 0 {
            warn!(
                skipped = snapshot.skipped(),
                "abilities reference missing channels, left out of routing cache"
            );
        }
        let stats = self.install(snapshot);
        info!(
            groups = stats.groups,
            routes = stats.routes,
            channels = stats.channels,
            "routing cache rebuilt"
        );
        Ok(stats)
    }

    pub fn install(&self, snapshot: CacheSnapshot) -> CacheStats {
        let stats = snapshot.stats();
        let previous = std::mem::replace(&mut *self.state.write(), snapshot);
        drop(previous);
        stats
    }

    pub fn stats(&self) -> CacheStats {
        self.state.read().stats()
    }

    /// Channel ids for (group, model), highest priority first.
    pub fn lookup(&self, group: &str, model: &str) -> Vec<i64> {
        self.routes(group, model)
            .into_iter()
            .map(|entry| entry.channel_id)
            .collect()
    }

    pub fn routes(&self, group: &str, model: &str) -> Vec<RouteEntry> {
        let state = self.state.read();
        state
            .routes
            .get(group)
            .and_then(|models| models.get(model))
            .cloned()
            .unwrap_or_default()
    }

    pub fn candidates(&self, group: &str, model: &str) -> Vec<CachedCandidate> {
        let state = self.state.read();
        let Some(entries) = state.routes.get(group).and_then(|models| models.get(model)) else {
            return Vec::new();
        };
        entries
            .iter()
            .map(|route| CachedCandidate {
                route: *route,
                channel: state.channels.get(&route.channel_id).cloned(),
            })
            .collect()
    }

    /// The cached record, whatever its status.
    pub fn get_channel(&self, channel_id: i64) -> Option<Arc<Channel>> {
        self.state.read().channels.get(&channel_id).cloned()
    }

    /// Updates the cached status in place. Returns false for unknown ids.
    pub fn update_status(&self, channel_id: i64, status: ChannelStatus) -> bool {
        let mut state = self.state.write();
        let Some(channel) = state.channels.get_mut(&channel_id) else {
            return false;
        };
        if channel.status != status {
            Arc::make_mut(channel).status = status;
        }
        true
    }

    /// Replaces the cached record in place. Route lists are left alone until
    /// the next rebuild. Returns true if the channel was already cached.
    pub fn update_channel(&self, channel: Channel) -> bool {
        self.state
            .write()
            .channels
            .insert(channel.id, Arc::new(channel))
            .is_some()
    }

    /// Drops the record. Routes still naming it are skipped at selection.
    pub fn remove_channel(&self, channel_id: i64) -> bool {
        self.state.write().channels.remove(&channel_id).is_some()
    }
}
