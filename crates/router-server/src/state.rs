use std::path::Path;
use std::sync::Arc;

use channel_router::ChannelRouter;
use control_plane::{default_config_toml, load_from_system_config, SystemConfig, SystemConfigLoader};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::AppError;

pub struct AppState {
    pub router: Arc<ChannelRouter>,
    pub sync_task: Option<JoinHandle<()>>,
}

impl AppState {
    pub fn new(router: Arc<ChannelRouter>) -> Self {
        let sync_task = router.start_periodic_sync(router.config().sync_frequency);
        Self {
            router,
            sync_task,
        }
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        if let Some(task) = self.sync_task.take() {
            task.abort();
        }
    }
}

pub fn load_config(path: &Path) -> Result<SystemConfig, AppError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(SystemConfigLoader::from_str(&raw)?)
}

pub fn create_default_config(path: &Path) -> Result<String, AppError> {
    let content = default_config_toml();
    std::fs::write(path, content.as_bytes())?;
    Ok(content)
}

/// Opens the stores on a blocking thread, then warms the routing cache. A
/// failed warm-up is logged and left to the periodic sync.
pub async fn build_router(config: SystemConfig) -> Result<Arc<ChannelRouter>, AppError> {
    let bundle = tokio::task::spawn_blocking(move || load_from_system_config(&config))
        .await
        .map_err(|err| AppError::internal(err.to_string()))??;
    let router = ChannelRouter::from_bundle(bundle).shared();
    match router.init_cache().await {
        Ok(Some(stats)) => info!(
            groups = stats.groups,
            routes = stats.routes,
            channels = stats.channels,
            "routing cache ready"
        ),
        Ok(None) => info!("memory cache disabled"),
        Err(err) => warn!(error = %err, "initial routing cache build failed"),
    }
    Ok(router)
}
