use std::sync::Arc;

use control_plane::{ChannelRepository, RepositoryError};

use crate::error::RouterError;

/// Runs a store call on the blocking pool so SQL clients never stall the runtime.
pub(crate) async fn with_store<T, F>(
    repo: &Arc<dyn ChannelRepository>,
    call: F,
) -> Result<T, RouterError>
where
    T: Send + 'static,
    F: FnOnce(&dyn ChannelRepository) -> Result<T, RepositoryError> + Send + 'static,
{
    let repo = repo.clone();
    tokio::task::spawn_blocking(move || call(repo.as_ref()))
        .await
        .map_err(|err| RouterError::Task(err.to_string()))?
        .map_err(RouterError::from)
}
