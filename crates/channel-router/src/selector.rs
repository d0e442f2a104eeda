use std::sync::Arc;

use control_plane::{Channel, ChannelRepository, RateLimiter};
use rand::Rng;
use tracing::{debug, warn};

use crate::cache::RoutingCache;
use crate::error::RouterError;
use crate::store::with_store;

/// Added to every cached candidate's weight so zero-weight channels still
/// receive some traffic.
pub const SMOOTHING_WEIGHT: u64 = 10;

/// Model families whose concrete names route through one wildcard entry.
const WILDCARD_FAMILIES: &[(&str, &str)] = &[
    ("gpt-4-gizmo", "gpt-4-gizmo-*"),
    ("gpt-4o-gizmo", "gpt-4o-gizmo-*"),
];

pub fn normalize_model(model: &str) -> &str {
    WILDCARD_FAMILIES
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, wildcard)| *wildcard)
        .unwrap_or(model)
}

/// Distinct values of `priorities`, highest first.
pub fn priority_tiers(priorities: impl IntoIterator<Item = i64>) -> Vec<i64> {
    let mut tiers: Vec<i64> = priorities.into_iter().collect();
    tiers.sort_unstable_by(|a, b| b.cmp(a));
    tiers.dedup();
    tiers
}

/// The tier a retry attempt draws from. Retries past the last tier stay on
/// the lowest one.
pub fn target_priority(tiers: &[i64], retry: usize) -> Option<i64> {
    let last = tiers.len().checked_sub(1)?;
    tiers.get(retry.min(last)).copied()
}

/// Picks an index with probability proportional to its weight. All-zero
/// weights fall back to a uniform draw.
pub fn weighted_index<R: Rng + ?Sized>(weights: &[u64], rng: &mut R) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }
    let total: u64 = weights.iter().sum();
    if total == 0 {
        return Some(rng.gen_range(0..weights.len()));
    }
    let mut cursor = rng.gen_range(0..total);
    for (index, weight) in weights.iter().enumerate() {
        if cursor < *weight {
            return Some(index);
        }
        cursor -= weight;
    }
    Some(weights.len() - 1)
}

/// Tiered weighted-random choice of one channel for (group, model).
///
/// Only the drawn candidate is checked against its status and the limiter,
/// so a rejected draw never consumes budget on its siblings.
pub struct SelectionEngine {
    rate_limiter: Arc<dyn RateLimiter>,
}

impl SelectionEngine {
    pub fn new(rate_limiter: Arc<dyn RateLimiter>) -> Self {
        Self { rate_limiter }
    }

    pub fn rate_limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.rate_limiter
    }

    pub async fn select_cached(
        &self,
        cache: &RoutingCache,
        group: &str,
        model: &str,
        retry: usize,
    ) -> Result<Arc<Channel>, RouterError> {
        let model = normalize_model(model);
        let mut live: Vec<(i64, Arc<Channel>)> = Vec::new();
        for candidate in cache.candidates(group, model) {
            match candidate.channel {
                Some(channel) if channel.is_enabled() => {
                    live.push((candidate.route.priority, channel))
                }
                Some(_) => {}
                None => warn!(
                    channel_id = candidate.route.channel_id,
                    group, model, "cached route points at a missing channel, skipping"
                ),
            }
        }
        let tiers = priority_tiers(live.iter().map(|(priority, _)| *priority));
        let Some(target) = target_priority(&tiers, retry) else {
            debug!(group, model, "no cached route");
            return Err(RouterError::not_found(group, model));
        };

        let mut pool: Vec<Arc<Channel>> = live
            .into_iter()
            .filter(|(priority, _)| *priority == target)
            .map(|(_, channel)| channel)
            .collect();

        while !pool.is_empty() {
            let weights: Vec<u64> = pool
                .iter()
                .map(|channel| u64::from(channel.weight()) + SMOOTHING_WEIGHT)
                .collect();
            let index = weighted_index(&weights, &mut rand::thread_rng()).unwrap_or(0);
            let channel = pool.swap_remove(index);
            if let Some(channel) = self.vet(channel).await {
                return Ok(channel);
            }
        }
        debug!(group, model, retry, priority = target, "every candidate in tier rejected");
        Err(RouterError::not_found(group, model))
    }

    /// Same contract as [`Self::select_cached`], answered from the store.
    /// Weights are used raw here.
    pub async fn select_direct(
        &self,
        repo: &Arc<dyn ChannelRepository>,
        group: &str,
        model: &str,
        retry: usize,
    ) -> Result<Arc<Channel>, RouterError> {
        let model = normalize_model(model).to_string();
        let group = group.to_string();

        let tiers = {
            let (group, model) = (group.clone(), model.clone());
            with_store(repo, move |repo| repo.enabled_priorities(&group, &model)).await?
        };
        let Some(target) = target_priority(&tiers, retry) else {
            debug!(group = %group, model = %model, "no enabled ability");
            return Err(RouterError::NotFound { group, model });
        };

        let mut pool = {
            let (group, model) = (group.clone(), model.clone());
            with_store(repo, move |repo| {
                repo.enabled_abilities_at_priority(&group, &model, target)
            })
            .await?
        };
        if pool.is_empty() {
            warn!(group = %group, model = %model, priority = target, "priority tier vanished between queries");
            return Err(RouterError::Inconsistent(format!(
                "no ability for {group}/{model} at priority {target}"
            )));
        }

        while !pool.is_empty() {
            let weights: Vec<u64> = pool.iter().map(|ability| u64::from(ability.weight)).collect();
            let index = weighted_index(&weights, &mut rand::thread_rng()).unwrap_or(0);
            let ability = pool.swap_remove(index);
            let channel_id = ability.channel_id;
            let Some(channel) = with_store(repo, move |repo| repo.get_channel(channel_id)).await?
            else {
                warn!(channel_id, group = %group, model = %model, "ability points at a missing channel, skipping");
                continue;
            };
            if let Some(channel) = self.vet(Arc::new(channel)).await {
                return Ok(channel);
            }
        }
        debug!(group = %group, model = %model, retry, priority = target, "every candidate in tier rejected");
        Err(RouterError::NotFound { group, model })
    }

    async fn vet(&self, channel: Arc<Channel>) -> Option<Arc<Channel>> {
        if !channel.is_enabled() {
            debug!(channel_id = channel.id, "drawn channel is disabled, redrawing");
            return None;
        }
        if !self.rate_limiter.admit(&channel).await.is_allowed() {
            debug!(channel_id = channel.id, "drawn channel is rate limited, redrawing");
            return None;
        }
        self.rate_limiter.record_usage(channel.id);
        Some(channel)
    }
}
