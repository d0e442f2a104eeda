use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use channel_router::{CacheStats, RepairReport};
use control_plane::{AbilityTagUpdate, Channel, ChannelInfo, ChannelStatus};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SelectionRequest {
    pub group: String,
    pub model: String,
    #[serde(default)]
    pub retry: usize,
}

#[derive(Serialize)]
pub struct SelectionResponse {
    pub channel_id: i64,
    pub channel_name: String,
    pub group: String,
    pub priority: i64,
    pub weight: u32,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub enabled: bool,
}

#[derive(Deserialize)]
pub struct TagStatusRequest {
    pub enabled: bool,
}

#[derive(Deserialize)]
pub struct ModelsQuery {
    pub group: Option<String>,
}

#[derive(Serialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelItem>,
}

#[derive(Serialize)]
pub struct ModelItem {
    pub id: String,
}

#[derive(Serialize)]
pub struct UpdatedResponse {
    pub updated: usize,
}

#[derive(Serialize)]
pub struct UsageResponse {
    pub channel_id: i64,
    pub usage: u64,
}

#[derive(Serialize)]
pub struct ReloadResponse {
    pub cache_enabled: bool,
    pub stats: Option<CacheStats>,
}

#[derive(Serialize)]
pub struct SimpleResponse {
    pub ok: bool,
}

pub async fn select_channel(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SelectionRequest>,
) -> Result<Json<SelectionResponse>, AppError> {
    if payload.model.trim().is_empty() {
        return Err(AppError::bad_request("model is required"));
    }
    let selection = state
        .router
        .select_channel(&payload.group, &payload.model, payload.retry)
        .await?;
    Ok(Json(SelectionResponse {
        channel_id: selection.channel.id,
        channel_name: selection.channel.name.clone(),
        group: selection.group,
        priority: selection.channel.priority(),
        weight: selection.channel.weight(),
    }))
}

pub async fn get_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Channel>, AppError> {
    let channel = state.router.get_channel(id).await?;
    Ok(Json(channel.as_ref().clone()))
}

pub async fn get_channel_info(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ChannelInfo>, AppError> {
    Ok(Json(state.router.get_channel_info(id).await?))
}

pub async fn get_channel_usage(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Json<UsageResponse> {
    Json(UsageResponse {
        channel_id: id,
        usage: state.router.usage(id),
    })
}

/// Re-derives abilities for a channel that was written by the admin layer.
pub async fn sync_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<SimpleResponse>, AppError> {
    let repo = state.router.repository().clone();
    let channel = tokio::task::spawn_blocking(move || repo.get_channel(id))
        .await
        .map_err(|err| AppError::internal(err.to_string()))??
        .ok_or_else(|| AppError::not_found(format!("channel #{id} does not exist")))?;
    state.router.on_channel_saved(&channel).await?;
    Ok(Json(SimpleResponse { ok: true }))
}

pub async fn channel_deleted(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<SimpleResponse>, AppError> {
    state.router.on_channel_deleted(id).await?;
    Ok(Json(SimpleResponse { ok: true }))
}

pub async fn set_channel_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<StatusRequest>,
) -> Result<Json<SimpleResponse>, AppError> {
    let status = if payload.enabled {
        ChannelStatus::Enabled
    } else {
        ChannelStatus::ManuallyDisabled
    };
    state.router.set_channel_status(id, status).await?;
    Ok(Json(SimpleResponse { ok: true }))
}

pub async fn update_tag(
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
    Json(payload): Json<AbilityTagUpdate>,
) -> Result<Json<UpdatedResponse>, AppError> {
    if payload.is_empty() {
        return Err(AppError::bad_request("nothing to update"));
    }
    let updated = state.router.update_abilities_by_tag(&tag, payload).await?;
    state.router.init_cache().await?;
    Ok(Json(UpdatedResponse { updated }))
}

pub async fn set_tag_status(
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
    Json(payload): Json<TagStatusRequest>,
) -> Result<Json<UpdatedResponse>, AppError> {
    let updated = state
        .router
        .set_ability_status_by_tag(&tag, payload.enabled)
        .await?;
    state.router.init_cache().await?;
    Ok(Json(UpdatedResponse { updated }))
}

pub async fn repair_abilities(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RepairReport>, AppError> {
    Ok(Json(state.router.repair_abilities().await?))
}

pub async fn reload_cache(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReloadResponse>, AppError> {
    let stats = state.router.init_cache().await?;
    Ok(Json(ReloadResponse {
        cache_enabled: stats.is_some(),
        stats,
    }))
}

pub async fn list_models(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ModelsQuery>,
) -> Result<Json<ModelsResponse>, AppError> {
    let models = state.router.enabled_models(query.group.as_deref()).await?;
    let data = models.into_iter().map(|id| ModelItem { id }).collect();
    Ok(Json(ModelsResponse {
        object: "list".to_string(),
        data,
    }))
}
