//! 방 제어 핸들러 (users / stats / cleanup / init)

use crate::error::ApiError;
use crate::protocol::{ParticipantView, RoomStats};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// `?token=` 쿼리 (헤더 대신 사용 가능)
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// 방 초기화 (기존 명단은 초기화됨)
pub async fn handle_init_room(
    State(state): State<Arc<AppState>>,
    Path(resource_id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let identity = state.authorize(&headers, query.token.as_deref(), &resource_id)?;
    state.rooms.initialize(&resource_id).await?;

    tracing::info!(resource_id = %resource_id, by = %identity.id, "Room initialized via control surface");
    Ok(Json(json!({ "success": true })))
}

/// 참여자 목록
pub async fn handle_list_users(
    State(state): State<Arc<AppState>>,
    Path(resource_id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<ParticipantView>>, ApiError> {
    state.authorize(&headers, query.token.as_deref(), &resource_id)?;
    let users = state.rooms.list_participants(&resource_id).await?;
    Ok(Json(users))
}

/// 방 통계
pub async fn handle_room_stats(
    State(state): State<Arc<AppState>>,
    Path(resource_id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<RoomStats>, ApiError> {
    state.authorize(&headers, query.token.as_deref(), &resource_id)?;
    let stats = state.rooms.stats(&resource_id).await?;
    Ok(Json(stats))
}

/// stale 참여자 즉시 정리
pub async fn handle_cleanup_room(
    State(state): State<Arc<AppState>>,
    Path(resource_id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&headers, query.token.as_deref(), &resource_id)?;
    let removed = state.rooms.cleanup_stale(&resource_id).await?;
    Ok(Json(json!({ "success": true, "removed": removed.len() })))
}

/// 주기적 stale 참여자 정리 (메모리에 살아있는 방만)
pub async fn cleanup_stale_rooms(state: Arc<AppState>) {
    let pruned = state.rooms.prune_closed();
    let removed = state.rooms.sweep_stale().await;

    if removed > 0 || pruned > 0 {
        tracing::info!(
            removed_participants = removed,
            pruned_coordinators = pruned,
            active_rooms = state.rooms.active_rooms(),
            "Cleanup completed"
        );
    }
}
