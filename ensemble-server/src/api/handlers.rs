//! HTTP request handlers

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use ensemble_common::{Error, PcmFormat};

use crate::providers::PlayerSnapshot;
use crate::queue::controller::{ItemRef, PlayMediaInput};
use crate::queue::types::{PlayerQueue, QueueItem, QueueOption, RepeatMode};
use crate::stream::{flow_stream, single_item_stream};

use super::{ApiError, AppState};

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: &'static str,
}

impl StatusResponse {
    fn ok() -> Json<Self> {
        Json(Self { status: "ok" })
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ItemsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    500
}

#[derive(Debug, Serialize)]
pub struct ItemsResponse {
    pub items: Vec<QueueItem>,
}

#[derive(Debug, Deserialize)]
pub struct PlayMediaRequest {
    pub media: Vec<PlayMediaInput>,
    #[serde(default)]
    pub option: Option<QueueOption>,
    #[serde(default)]
    pub radio_mode: bool,
    #[serde(default)]
    pub start_item: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub pos_shift: i64,
}

#[derive(Debug, Deserialize)]
pub struct ShuffleRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct RepeatRequest {
    pub repeat_mode: RepeatMode,
}

#[derive(Debug, Deserialize)]
pub struct DontStopTheMusicRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub target_queue_id: Uuid,
    #[serde(default)]
    pub auto_play: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SeekRequest {
    pub position: u64,
}

#[derive(Debug, Deserialize)]
pub struct SkipRequest {
    pub seconds: i64,
}

#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    #[serde(default)]
    pub fade_in: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PlayIndexRequest {
    pub item: ItemRef,
    #[serde(default)]
    pub seek_position: u64,
    #[serde(default)]
    pub fade_in: bool,
}

// ============================================================================
// Queue inspection
// ============================================================================

pub async fn list_queues(State(state): State<AppState>) -> Json<Vec<PlayerQueue>> {
    Json(state.controller.list_queues().await)
}

pub async fn get_queue(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
) -> Result<Json<PlayerQueue>, ApiError> {
    state
        .controller
        .get_queue(queue_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError(Error::PlayerUnavailable(format!("unknown queue {queue_id}"))))
}

pub async fn get_queue_items(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
    Query(query): Query<ItemsQuery>,
) -> Json<ItemsResponse> {
    let items = state
        .controller
        .get_items(queue_id, query.limit, query.offset)
        .await;
    Json(ItemsResponse { items })
}

// ============================================================================
// Player lifecycle
// ============================================================================

pub async fn register_player(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    info!(%queue_id, name = %req.display_name, "registering player queue");
    state
        .controller
        .register_player(queue_id, &req.display_name)
        .await?;
    Ok(StatusResponse::ok())
}

pub async fn remove_player(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
) -> Json<StatusResponse> {
    state.controller.remove_player(queue_id).await;
    StatusResponse::ok()
}

// ============================================================================
// Queue mutation
// ============================================================================

pub async fn play_media(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
    Json(req): Json<PlayMediaRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .controller
        .play_media(queue_id, req.media, req.option, req.radio_mode, req.start_item)
        .await?;
    Ok(StatusResponse::ok())
}

pub async fn move_item(
    State(state): State<AppState>,
    Path((queue_id, item_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<MoveRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .controller
        .move_item(queue_id, item_id, req.pos_shift)
        .await?;
    Ok(StatusResponse::ok())
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path((queue_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .controller
        .delete_item(queue_id, ItemRef::Id(item_id))
        .await?;
    Ok(StatusResponse::ok())
}

pub async fn clear(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.controller.clear(queue_id).await?;
    Ok(StatusResponse::ok())
}

pub async fn set_shuffle(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
    Json(req): Json<ShuffleRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.controller.set_shuffle(queue_id, req.enabled).await?;
    Ok(StatusResponse::ok())
}

pub async fn set_repeat(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
    Json(req): Json<RepeatRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.controller.set_repeat(queue_id, req.repeat_mode).await?;
    Ok(StatusResponse::ok())
}

pub async fn set_dont_stop_the_music(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
    Json(req): Json<DontStopTheMusicRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .controller
        .set_dont_stop_the_music(queue_id, req.enabled)
        .await?;
    Ok(StatusResponse::ok())
}

pub async fn transfer_queue(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .controller
        .transfer_queue(queue_id, req.target_queue_id, req.auto_play)
        .await?;
    Ok(StatusResponse::ok())
}

// ============================================================================
// Transport
// ============================================================================

pub async fn play(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.controller.play(queue_id).await?;
    Ok(StatusResponse::ok())
}

pub async fn pause(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.controller.pause(queue_id).await?;
    Ok(StatusResponse::ok())
}

pub async fn play_pause(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.controller.play_pause(queue_id).await?;
    Ok(StatusResponse::ok())
}

pub async fn stop(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.controller.stop(queue_id).await?;
    Ok(StatusResponse::ok())
}

pub async fn next(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.controller.next(queue_id).await?;
    Ok(StatusResponse::ok())
}

pub async fn previous(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.controller.previous(queue_id).await?;
    Ok(StatusResponse::ok())
}

pub async fn seek(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
    Json(req): Json<SeekRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.controller.seek(queue_id, req.position).await?;
    Ok(StatusResponse::ok())
}

pub async fn skip(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
    Json(req): Json<SkipRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.controller.skip(queue_id, req.seconds).await?;
    Ok(StatusResponse::ok())
}

pub async fn resume(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
    Json(req): Json<ResumeRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.controller.resume(queue_id, req.fade_in).await?;
    Ok(StatusResponse::ok())
}

pub async fn play_index(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
    Json(req): Json<PlayIndexRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .controller
        .play_index(queue_id, req.item, req.seek_position, req.fade_in, false)
        .await?;
    Ok(StatusResponse::ok())
}

// ============================================================================
// Player driver callbacks
// ============================================================================

pub async fn player_update(
    State(state): State<AppState>,
    Path(_queue_id): Path<Uuid>,
    Json(snapshot): Json<PlayerSnapshot>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.controller.on_player_update(snapshot).await?;
    Ok(StatusResponse::ok())
}

pub async fn track_loaded_in_buffer(
    State(state): State<AppState>,
    Path((queue_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .controller
        .track_loaded_in_buffer(queue_id, item_id)
        .await?;
    Ok(StatusResponse::ok())
}

// ============================================================================
// Renderer stream endpoints
// ============================================================================

/// Strip the trailing `.pcm` renderers require in the url
fn parse_item_path(raw: &str) -> Result<Uuid, ApiError> {
    let trimmed = raw.trim_end_matches(".pcm");
    trimmed
        .parse()
        .map_err(|_| ApiError(Error::InvalidCommand(format!("invalid item id {raw}"))))
}

fn pcm_response(stream: crate::providers::PcmStream, pcm_format: PcmFormat) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, pcm_format.content_type())
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// GET /stream/flow/:queue_id/:item_id.pcm
pub async fn stream_flow(
    State(state): State<AppState>,
    Path((queue_id, item_id)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    let item_id = parse_item_path(&item_id)?;
    info!(%queue_id, %item_id, "renderer connected to flow stream");
    let pcm_format = PcmFormat::default();
    let stream = flow_stream(state.controller.clone(), queue_id, item_id, pcm_format);
    Ok(pcm_response(stream, pcm_format))
}

/// GET /stream/single/:queue_id/:item_id.pcm
pub async fn stream_single(
    State(state): State<AppState>,
    Path((queue_id, item_id)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    let item_id = parse_item_path(&item_id)?;
    info!(%queue_id, %item_id, "renderer connected to single-item stream");
    let pcm_format = PcmFormat::default();
    let stream = single_item_stream(state.controller.clone(), queue_id, item_id, pcm_format);
    Ok(pcm_response(stream, pcm_format))
}
