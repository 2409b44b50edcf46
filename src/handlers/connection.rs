//! WebSocket 연결 핸들러

use crate::clock::Clock;
use crate::error::{ApiError, RoomError};
use crate::handlers::auth::Identity;
use crate::handlers::room::TokenQuery;
use crate::protocol::{MessageType, RoomMessage};
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};

/// 인증/권한 확인 후 업그레이드
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(resource_id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = state.authorize(&headers, query.token.as_deref(), &resource_id)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, resource_id, identity)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, resource_id: String, identity: Identity) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<RoomMessage>();

    // 송신 태스크
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    let connection_id = handle_connection(&state, &resource_id, &identity, tx).await;

    // 수신 처리
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_client_text(&state, &connection_id, &resource_id, &identity.id, &text).await;
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    // 연결 해제
    handle_disconnect(&state, &connection_id).await;
    send_task.abort();
}

/// 새 연결 처리: 방 지연 생성, 참여자 등록, 입장 알림
pub async fn handle_connection(
    state: &AppState,
    resource_id: &str,
    identity: &Identity,
    sender: UnboundedSender<RoomMessage>,
) -> String {
    let connection_id = state.hub.register(resource_id, &identity.id, sender);

    if let Err(e) = join_room(state, resource_id, identity).await {
        tracing::error!(
            resource_id = %resource_id,
            participant_id = %identity.id,
            error = %e,
            "Failed to join room"
        );
        send_error(state, &connection_id, &e);
    }

    tracing::info!(
        connection_id = %connection_id,
        resource_id = %resource_id,
        participant_id = %identity.id,
        room_connections = state.hub.connection_count(resource_id),
        "New connection established"
    );
    connection_id
}

async fn join_room(state: &AppState, resource_id: &str, identity: &Identity) -> Result<(), RoomError> {
    if state.rooms.ensure_initialized(resource_id).await? {
        tracing::info!(resource_id = %resource_id, "Room created on first access");
    }
    state
        .rooms
        .add_user(resource_id, &identity.id, identity.meta())
        .await?;

    let joined = RoomMessage::new(MessageType::UserJoined, state.clock.now_ms())
        .with_payload(json!({
            "id": identity.id,
            "displayName": identity.display_name,
        }))
        .with_sender(identity.id.clone());
    state.rooms.broadcast(resource_id, joined).await?;
    Ok(())
}

/// 연결 해제 처리. 같은 참여자의 다른 연결이 없을 때만 명단에서 제거
pub async fn handle_disconnect(state: &AppState, connection_id: &str) {
    let Some((connection, still_connected)) = state.hub.unregister(connection_id) else {
        return;
    };

    if !still_connected {
        let resource_id = &connection.resource_id;
        let participant_id = &connection.participant_id;

        match state.rooms.remove_user(resource_id, participant_id).await {
            Ok(true) => {
                let left = RoomMessage::new(MessageType::UserLeft, state.clock.now_ms())
                    .with_payload(json!({ "id": participant_id }))
                    .with_sender(participant_id.clone());
                if let Err(e) = state.rooms.broadcast(resource_id, left).await {
                    tracing::warn!(resource_id = %resource_id, error = %e, "Failed to announce departure");
                }
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(
                resource_id = %resource_id,
                participant_id = %participant_id,
                error = %e,
                "Failed to remove participant"
            ),
        }
    }

    tracing::info!(
        connection_id = %connection_id,
        connected_for_ms = connection.connected_at.elapsed().as_millis() as u64,
        "Connection closed"
    );
}

/// 클라이언트 텍스트 프레임 처리
pub async fn handle_client_text(
    state: &AppState,
    connection_id: &str,
    resource_id: &str,
    participant_id: &str,
    text: &str,
) {
    let msg = match serde_json::from_str::<RoomMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(connection_id = %connection_id, error = %e, "Malformed client message");
            let now = state.clock.now_ms();
            state
                .hub
                .send_to(connection_id, RoomMessage::error("INVALID_MESSAGE", "malformed message", now));
            return;
        }
    };

    let result = match msg.kind {
        MessageType::Ping => {
            let pong = RoomMessage::new(MessageType::Pong, state.clock.now_ms());
            state.hub.send_to(connection_id, pong);
            state.rooms.update_activity(resource_id, participant_id).await.map(|_| ())
        }
        MessageType::Pong => state.rooms.update_activity(resource_id, participant_id).await.map(|_| ()),
        MessageType::ResourceUpdate => state
            .rooms
            .apply_resource_update(resource_id, msg.payload.unwrap_or(Value::Null), participant_id)
            .await
            .map(|_| ()),
        MessageType::UserJoined | MessageType::UserLeft | MessageType::Error => {
            let now = state.clock.now_ms();
            state.hub.send_to(
                connection_id,
                RoomMessage::error("UNSUPPORTED_MESSAGE", "message type is server-only", now),
            );
            Ok(())
        }
    };

    if let Err(e) = result {
        tracing::warn!(
            resource_id = %resource_id,
            participant_id = %participant_id,
            error = %e,
            "Client message failed"
        );
        send_error(state, connection_id, &e);
    }
}

fn send_error(state: &AppState, connection_id: &str, error: &RoomError) {
    let code = match error {
        RoomError::RoomNotInitialized => "ROOM_NOT_INITIALIZED",
        RoomError::TransportUnavailable => "TRANSPORT_UNAVAILABLE",
        RoomError::Storage(_) | RoomError::Internal(_) => "INTERNAL_ERROR",
    };
    let message = match error {
        RoomError::Storage(_) | RoomError::Internal(_) => "internal error".to_string(),
        other => other.to_string(),
    };
    state
        .hub
        .send_to(connection_id, RoomMessage::error(code, &message, state.clock.now_ms()));
}
