use std::sync::Arc;

use control_plane::{
    AbilityTagUpdate, Channel, ChannelRepository, ChannelStatus, RepositoryError,
    ABILITY_BATCH_SIZE,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::RouterError;
use crate::store::with_store;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub repaired: usize,
    pub failed: usize,
}

/// Keeps ability rows in step with the channel records they are derived from.
#[derive(Clone)]
pub struct AbilityService {
    repo: Arc<dyn ChannelRepository>,
    repair_lock: Arc<Mutex<()>>,
}

impl AbilityService {
    pub fn new(repo: Arc<dyn ChannelRepository>) -> Self {
        Self {
            repo,
            repair_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Replaces every ability of `channel` with its current model × group fan-out.
    pub async fn sync_channel(&self, channel: &Channel) -> Result<usize, RouterError> {
        let channel_id = channel.id;
        let abilities = channel.abilities();
        let written = abilities.len();
        with_store(&self.repo, move |repo| {
            repo.replace_channel_abilities(channel_id, &abilities)
        })
        .await
        .map(|()| written)
    }

    pub async fn delete_channel(&self, channel_id: i64) -> Result<usize, RouterError> {
        with_store(&self.repo, move |repo| {
            repo.delete_channel_abilities(&[channel_id])
        })
        .await
    }

    /// Writes the channel status and flips its abilities to match. Returns
    /// false when the channel does not exist.
    pub async fn set_channel_status(
        &self,
        channel_id: i64,
        status: ChannelStatus,
    ) -> Result<bool, RouterError> {
        with_store(&self.repo, move |repo| {
            if !repo.update_channel_status(channel_id, status)? {
                return Ok(false);
            }
            repo.update_ability_status(channel_id, status.is_enabled())?;
            Ok(true)
        })
        .await
    }

    pub async fn set_status_by_tag(&self, tag: &str, enabled: bool) -> Result<usize, RouterError> {
        let tag = tag.to_string();
        with_store(&self.repo, move |repo| {
            repo.update_ability_status_by_tag(&tag, enabled)
        })
        .await
    }

    pub async fn update_by_tag(
        &self,
        tag: &str,
        update: AbilityTagUpdate,
    ) -> Result<usize, RouterError> {
        if update.is_empty() {
            return Ok(0);
        }
        let tag = tag.to_string();
        with_store(&self.repo, move |repo| {
            repo.update_abilities_by_tag(&tag, &update)
        })
        .await
    }

    /// Regenerates abilities for every channel. A second call while one is
    /// running is rejected rather than queued.
    pub async fn repair(&self) -> Result<RepairReport, RouterError> {
        let guard = self
            .repair_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| RouterError::RepairInProgress)?;
        info!("ability repair started");
        let report = with_store(&self.repo, move |repo| {
            let report = regenerate_abilities(repo);
            drop(guard);
            report
        })
        .await?;
        info!(
            repaired = report.repaired,
            failed = report.failed,
            "ability repair finished"
        );
        Ok(report)
    }
}

/// Rebuilds abilities batch by batch. A batch whose delete fails counts all
/// of its channels as failed; inside a batch each channel succeeds or fails
/// on its own.
pub fn regenerate_abilities(repo: &dyn ChannelRepository) -> Result<RepairReport, RepositoryError> {
    let channels = repo.all_channels()?;
    let mut report = RepairReport::default();
    for batch in channels.chunks(ABILITY_BATCH_SIZE) {
        let ids: Vec<i64> = batch.iter().map(|channel| channel.id).collect();
        if let Err(err) = repo.delete_channel_abilities(&ids) {
            warn!(error = %err, channels = ids.len(), "failed to clear abilities for batch");
            report.failed += batch.len();
            continue;
        }
        for channel in batch {
            match repo.insert_abilities(&channel.abilities()) {
                Ok(_) => report.repaired += 1,
                Err(err) => {
                    warn!(channel_id = channel.id, error = %err, "failed to regenerate abilities");
                    report.failed += 1;
                }
            }
        }
    }
    Ok(report)
}
