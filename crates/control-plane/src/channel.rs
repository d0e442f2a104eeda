use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ChannelStatus {
    Unknown,
    Enabled,
    ManuallyDisabled,
    AutoDisabled,
}

impl ChannelStatus {
    pub fn code(self) -> i64 {
        match self {
            ChannelStatus::Unknown => 0,
            ChannelStatus::Enabled => 1,
            ChannelStatus::ManuallyDisabled => 2,
            ChannelStatus::AutoDisabled => 3,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ChannelStatus::Enabled,
            2 => ChannelStatus::ManuallyDisabled,
            3 => ChannelStatus::AutoDisabled,
            _ => ChannelStatus::Unknown,
        }
    }

    pub fn is_enabled(self) -> bool {
        self == ChannelStatus::Enabled
    }
}

impl Default for ChannelStatus {
    fn default() -> Self {
        Self::Enabled
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiKeyMode {
    Random,
    Polling,
}

impl Default for MultiKeyMode {
    fn default() -> Self {
        Self::Random
    }
}

/// Read-only projection of a channel's multi-key bookkeeping. The polling
/// index is advanced by request-forwarding code outside the router.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    #[serde(default)]
    pub is_multi_key: bool,
    #[serde(default)]
    pub multi_key_size: u32,
    #[serde(default)]
    pub multi_key_polling_index: u32,
    #[serde(default)]
    pub multi_key_mode: MultiKeyMode,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub status: ChannelStatus,
    /// Comma-separated model names.
    pub models: String,
    /// Comma-separated group names.
    pub group: String,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub weight: Option<u32>,
    /// Requests per minute; `None` or a value <= 0 means unlimited.
    #[serde(default)]
    pub rate_limit: Option<i64>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub info: ChannelInfo,
}

impl Channel {
    pub fn new(id: i64, name: impl Into<String>, models: &str, group: &str) -> Self {
        Self {
            id,
            name: name.into(),
            status: ChannelStatus::Enabled,
            models: models.to_string(),
            group: group.to_string(),
            priority: None,
            weight: None,
            rate_limit: None,
            tag: None,
            info: ChannelInfo::default(),
        }
    }

    pub fn priority(&self) -> i64 {
        self.priority.unwrap_or(0)
    }

    pub fn weight(&self) -> u32 {
        self.weight.unwrap_or(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.status.is_enabled()
    }

    /// The configured per-minute limit, or `None` when the channel is unlimited.
    pub fn effective_rate_limit(&self) -> Option<u32> {
        match self.rate_limit {
            Some(limit) if limit > 0 => Some(limit.min(u32::MAX as i64) as u32),
            _ => None,
        }
    }

    pub fn model_list(&self) -> Vec<String> {
        split_list(&self.models)
    }

    pub fn group_list(&self) -> Vec<String> {
        split_list(&self.group)
    }

    /// Fans the channel out into one ability per distinct (group, model) pair.
    pub fn abilities(&self) -> Vec<Ability> {
        let models = self.model_list();
        let groups = self.group_list();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut abilities = Vec::with_capacity(models.len() * groups.len());
        for model in &models {
            for group in &groups {
                if !seen.insert((group.clone(), model.clone())) {
                    continue;
                }
                abilities.push(Ability {
                    group: group.clone(),
                    model: model.clone(),
                    channel_id: self.id,
                    enabled: self.is_enabled(),
                    priority: self.priority,
                    weight: self.weight(),
                    tag: self.tag.clone(),
                });
            }
        }
        abilities
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ability {
    pub group: String,
    pub model: String,
    pub channel_id: i64,
    pub enabled: bool,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub tag: Option<String>,
}

impl Ability {
    /// Own priority if set, else the owning channel's, else 0.
    pub fn effective_priority(&self, channel: Option<&Channel>) -> i64 {
        self.priority
            .or_else(|| channel.and_then(|c| c.priority))
            .unwrap_or(0)
    }
}

/// Fields to overwrite on every ability carrying a given tag; `None` leaves
/// the column untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityTagUpdate {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub weight: Option<u32>,
}

impl AbilityTagUpdate {
    pub fn is_empty(&self) -> bool {
        self.tag.is_none() && self.priority.is_none() && self.weight.is_none()
    }

    pub fn apply(&self, ability: &mut Ability) {
        if let Some(tag) = &self.tag {
            ability.tag = Some(tag.clone());
        }
        if let Some(priority) = self.priority {
            ability.priority = Some(priority);
        }
        if let Some(weight) = self.weight {
            ability.weight = weight;
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect()
}
