use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::channel::{Ability, AbilityTagUpdate, Channel, ChannelStatus};

/// Upper bound on rows written by a single insert statement.
pub const ABILITY_BATCH_SIZE: usize = 50;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository error: {0}")]
    Store(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// The durable system of record for channels and their abilities.
///
/// Implementations are synchronous; async callers are expected to hop onto a
/// blocking thread before calling in.
pub trait ChannelRepository: Send + Sync {
    fn all_channels(&self) -> Result<Vec<Channel>, RepositoryError>;
    fn get_channel(&self, id: i64) -> Result<Option<Channel>, RepositoryError>;
    fn upsert_channel(&self, channel: &Channel) -> Result<(), RepositoryError>;
    fn delete_channel(&self, id: i64) -> Result<bool, RepositoryError>;
    fn update_channel_status(&self, id: i64, status: ChannelStatus)
        -> Result<bool, RepositoryError>;

    fn all_abilities(&self) -> Result<Vec<Ability>, RepositoryError>;
    fn enabled_abilities(&self, group: &str, model: &str) -> Result<Vec<Ability>, RepositoryError>;
    /// Distinct effective priorities of enabled abilities, highest first.
    fn enabled_priorities(&self, group: &str, model: &str) -> Result<Vec<i64>, RepositoryError>;
    /// Enabled abilities whose effective priority equals `priority`, heaviest first.
    fn enabled_abilities_at_priority(
        &self,
        group: &str,
        model: &str,
        priority: i64,
    ) -> Result<Vec<Ability>, RepositoryError>;
    fn enabled_models(&self, group: Option<&str>) -> Result<Vec<String>, RepositoryError>;

    /// Inserts rows in batches of [`ABILITY_BATCH_SIZE`], skipping rows whose
    /// (group, model, channel_id) already exists. Returns the number inserted.
    fn insert_abilities(&self, abilities: &[Ability]) -> Result<usize, RepositoryError>;
    /// Deletes every ability of `channel_id` and inserts `abilities` in one transaction.
    fn replace_channel_abilities(
        &self,
        channel_id: i64,
        abilities: &[Ability],
    ) -> Result<(), RepositoryError>;
    fn delete_channel_abilities(&self, channel_ids: &[i64]) -> Result<usize, RepositoryError>;
    fn update_ability_status(&self, channel_id: i64, enabled: bool)
        -> Result<usize, RepositoryError>;
    fn update_ability_status_by_tag(&self, tag: &str, enabled: bool)
        -> Result<usize, RepositoryError>;
    fn update_abilities_by_tag(
        &self,
        tag: &str,
        update: &AbilityTagUpdate,
    ) -> Result<usize, RepositoryError>;
}

type AbilityKey = (String, String, i64);

#[derive(Default)]
struct InMemoryState {
    channels: BTreeMap<i64, Channel>,
    abilities: BTreeMap<AbilityKey, Ability>,
}

impl InMemoryState {
    fn enabled_matching<'a>(
        &'a self,
        group: &'a str,
        model: &'a str,
    ) -> impl Iterator<Item = &'a Ability> + 'a {
        self.abilities
            .values()
            .filter(move |a| a.enabled && a.group == group && a.model == model)
    }

    fn effective_priority(&self, ability: &Ability) -> i64 {
        ability.effective_priority(self.channels.get(&ability.channel_id))
    }

    fn insert_ignore(&mut self, ability: &Ability) -> bool {
        let key = ability_key(ability);
        if self.abilities.contains_key(&key) {
            return false;
        }
        self.abilities.insert(key, ability.clone());
        true
    }
}

#[derive(Clone, Default)]
pub struct InMemoryChannelRepository {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryChannelRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl ChannelRepository for InMemoryChannelRepository {
    fn all_channels(&self) -> Result<Vec<Channel>, RepositoryError> {
        Ok(self.state.read().channels.values().cloned().collect())
    }

    fn get_channel(&self, id: i64) -> Result<Option<Channel>, RepositoryError> {
        Ok(self.state.read().channels.get(&id).cloned())
    }

    fn upsert_channel(&self, channel: &Channel) -> Result<(), RepositoryError> {
        self.state
            .write()
            .channels
            .insert(channel.id, channel.clone());
        Ok(())
    }

    fn delete_channel(&self, id: i64) -> Result<bool, RepositoryError> {
        Ok(self.state.write().channels.remove(&id).is_some())
    }

    fn update_channel_status(
        &self,
        id: i64,
        status: ChannelStatus,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write();
        let Some(channel) = state.channels.get_mut(&id) else {
            return Ok(false);
        };
        channel.status = status;
        Ok(true)
    }

    fn all_abilities(&self) -> Result<Vec<Ability>, RepositoryError> {
        Ok(self.state.read().abilities.values().cloned().collect())
    }

    fn enabled_abilities(&self, group: &str, model: &str) -> Result<Vec<Ability>, RepositoryError> {
        let state = self.state.read();
        Ok(state.enabled_matching(group, model).cloned().collect())
    }

    fn enabled_priorities(&self, group: &str, model: &str) -> Result<Vec<i64>, RepositoryError> {
        let state = self.state.read();
        let distinct: BTreeSet<i64> = state
            .enabled_matching(group, model)
            .map(|a| state.effective_priority(a))
            .collect();
        Ok(distinct.into_iter().rev().collect())
    }

    fn enabled_abilities_at_priority(
        &self,
        group: &str,
        model: &str,
        priority: i64,
    ) -> Result<Vec<Ability>, RepositoryError> {
        let state = self.state.read();
        let mut abilities: Vec<Ability> = state
            .enabled_matching(group, model)
            .filter(|a| state.effective_priority(a) == priority)
            .cloned()
            .collect();
        abilities.sort_by(|a, b| b.weight.cmp(&a.weight));
        Ok(abilities)
    }

    fn enabled_models(&self, group: Option<&str>) -> Result<Vec<String>, RepositoryError> {
        let state = self.state.read();
        let models: BTreeSet<String> = state
            .abilities
            .values()
            .filter(|a| a.enabled && group.map_or(true, |g| a.group == g))
            .map(|a| a.model.clone())
            .collect();
        Ok(models.into_iter().collect())
    }

    fn insert_abilities(&self, abilities: &[Ability]) -> Result<usize, RepositoryError> {
        let mut state = self.state.write();
        let mut inserted = 0;
        for chunk in abilities.chunks(ABILITY_BATCH_SIZE) {
            for ability in chunk {
                if state.insert_ignore(ability) {
                    inserted += 1;
                }
            }
        }
        Ok(inserted)
    }

    fn replace_channel_abilities(
        &self,
        channel_id: i64,
        abilities: &[Ability],
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        state.abilities.retain(|key, _| key.2 != channel_id);
        for ability in abilities {
            state.insert_ignore(ability);
        }
        Ok(())
    }

    fn delete_channel_abilities(&self, channel_ids: &[i64]) -> Result<usize, RepositoryError> {
        let mut state = self.state.write();
        let before = state.abilities.len();
        state
            .abilities
            .retain(|key, _| !channel_ids.contains(&key.2));
        Ok(before - state.abilities.len())
    }

    fn update_ability_status(
        &self,
        channel_id: i64,
        enabled: bool,
    ) -> Result<usize, RepositoryError> {
        let mut state = self.state.write();
        let mut updated = 0;
        for ability in state
            .abilities
            .values_mut()
            .filter(|a| a.channel_id == channel_id)
        {
            ability.enabled = enabled;
            updated += 1;
        }
        Ok(updated)
    }

    fn update_ability_status_by_tag(
        &self,
        tag: &str,
        enabled: bool,
    ) -> Result<usize, RepositoryError> {
        let mut state = self.state.write();
        let mut updated = 0;
        for ability in state
            .abilities
            .values_mut()
            .filter(|a| a.tag.as_deref() == Some(tag))
        {
            ability.enabled = enabled;
            updated += 1;
        }
        Ok(updated)
    }

    fn update_abilities_by_tag(
        &self,
        tag: &str,
        update: &AbilityTagUpdate,
    ) -> Result<usize, RepositoryError> {
        if update.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.write();
        let mut updated = 0;
        for ability in state
            .abilities
            .values_mut()
            .filter(|a| a.tag.as_deref() == Some(tag))
        {
            update.apply(ability);
            updated += 1;
        }
        Ok(updated)
    }
}

fn ability_key(ability: &Ability) -> AbilityKey {
    (
        ability.group.clone(),
        ability.model.clone(),
        ability.channel_id,
    )
}
