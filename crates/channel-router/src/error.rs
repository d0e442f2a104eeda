use control_plane::RepositoryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no available channel for model {model} in group {group}")]
    NotFound { group: String, model: String },
    #[error("channel #{0} does not exist")]
    ChannelNotFound(i64),
    #[error("channel #{0} is disabled")]
    ChannelDisabled(i64),
    #[error("routing data is inconsistent: {0}")]
    Inconsistent(String),
    #[error("auto group requested but no auto groups are configured")]
    AutoGroupsNotConfigured,
    #[error("an ability repair is already running")]
    RepairInProgress,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("background task failed: {0}")]
    Task(String),
}

impl RouterError {
    pub fn not_found(group: &str, model: &str) -> Self {
        RouterError::NotFound {
            group: group.to_string(),
            model: model.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RouterError::NotFound { .. })
    }
}
