//! 방 코디네이터: 참여자 명단, 활동 기록, 브로드캐스트

use crate::clock::Clock;
use crate::error::RoomError;
use crate::protocol::{MessageType, ParticipantView, RoomMessage, RoomStats};
use crate::room::model::{ParticipantMeta, Room};
use crate::store::RoomStore;
use crate::transport::Transport;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// 코디네이터가 공유하는 외부 협력자와 설정
#[derive(Clone)]
pub struct RoomContext {
    pub store: Arc<dyn RoomStore>,
    pub transport: Arc<dyn Transport>,
    pub clock: Arc<dyn Clock>,
    pub online_threshold: Duration,
    pub stale_threshold: Duration,
}

/// 리소스 하나의 방 상태를 소유하는 코디네이터.
///
/// 모든 메서드는 `&mut self`로 호출되므로 한 번에 하나의 변경만 진행된다.
/// 영속화는 메서드가 반환되기 전에 끝난다.
pub struct RoomCoordinator {
    resource_id: String,
    room: Option<Room>,
    ctx: RoomContext,
}

impl RoomCoordinator {
    /// 저장소에서 기존 상태를 불러와 활성화
    pub async fn activate(resource_id: String, ctx: RoomContext) -> Result<Self, RoomError> {
        let room = ctx.store.get(&resource_id).await.map_err(|e| {
            tracing::error!(resource_id = %resource_id, error = %e, "Failed to load room state");
            RoomError::from(e)
        })?;

        tracing::debug!(
            resource_id = %resource_id,
            restored = room.is_some(),
            "Room coordinator activated"
        );

        let mut coordinator = Self {
            resource_id,
            room,
            ctx,
        };
        coordinator.evict_on_activation().await;
        Ok(coordinator)
    }

    /// 메모리에 없던 동안 stale이 된 참여자 정리 (스윕은 살아있는 액터만 방문)
    async fn evict_on_activation(&mut self) {
        let now = self.now();
        let stale_threshold = self.ctx.stale_threshold;
        let removed = match self.room.as_mut() {
            Some(room) => {
                let removed = room.evict_stale(now, stale_threshold);
                if !removed.is_empty() {
                    room.touch(now);
                }
                removed
            }
            None => return,
        };
        if removed.is_empty() {
            return;
        }

        tracing::info!(
            resource_id = %self.resource_id,
            removed = ?removed,
            "Stale participants dropped on activation"
        );
        // 실패해도 다음 변경 때 전체 상태가 다시 기록됨
        let _ = self.persist().await;
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    fn now(&self) -> i64 {
        self.ctx.clock.now_ms()
    }

    async fn persist(&self) -> Result<(), RoomError> {
        let Some(room) = &self.room else {
            return Ok(());
        };
        self.ctx
            .store
            .put(&self.resource_id, room)
            .await
            .map_err(|e| {
                tracing::error!(resource_id = %self.resource_id, error = %e, "Failed to persist room state");
                RoomError::from(e)
            })
    }

    /// 빈 방 생성. 이미 있으면 명단을 초기화한다.
    pub async fn initialize(&mut self) -> Result<(), RoomError> {
        let reset = self.room.is_some();
        self.room = Some(Room::new(self.resource_id.clone(), self.now()));
        self.persist().await?;

        tracing::info!(resource_id = %self.resource_id, reset = reset, "Room initialized");
        Ok(())
    }

    /// 방이 없을 때만 생성 (게이트웨이의 지연 생성용)
    pub async fn ensure_initialized(&mut self) -> Result<bool, RoomError> {
        if self.room.is_some() {
            return Ok(false);
        }
        self.initialize().await?;
        Ok(true)
    }

    /// 참여자 등록. 방이 없으면 no-op
    pub async fn add_user(
        &mut self,
        participant_id: &str,
        meta: ParticipantMeta,
    ) -> Result<bool, RoomError> {
        let now = self.now();
        let Some(room) = self.room.as_mut() else {
            tracing::debug!(
                resource_id = %self.resource_id,
                participant_id = %participant_id,
                "add_user before initialization ignored"
            );
            return Ok(false);
        };

        room.upsert_participant(participant_id, meta, now);
        let total = room.participants.len();
        self.persist().await?;

        tracing::info!(
            resource_id = %self.resource_id,
            participant_id = %participant_id,
            total = total,
            "Participant registered"
        );
        Ok(true)
    }

    /// 참여자 제거. 살아있는 연결이 남아있으면 (재접속) 제거하지 않음
    pub async fn remove_user(&mut self, participant_id: &str) -> Result<bool, RoomError> {
        if self.ctx.transport.is_connected(&self.resource_id, participant_id) {
            tracing::debug!(
                resource_id = %self.resource_id,
                participant_id = %participant_id,
                "Participant still connected, removal skipped"
            );
            return Ok(false);
        }

        let now = self.now();
        let removed = match self.room.as_mut() {
            Some(room) => room.remove_participant(participant_id, now),
            None => false,
        };

        if removed {
            self.persist().await?;
            tracing::info!(
                resource_id = %self.resource_id,
                participant_id = %participant_id,
                "Participant removed"
            );
        }
        Ok(removed)
    }

    pub async fn update_activity(&mut self, participant_id: &str) -> Result<bool, RoomError> {
        let now = self.now();
        let touched = match self.room.as_mut() {
            Some(room) => room.record_activity(participant_id, now),
            None => false,
        };

        if touched {
            self.persist().await?;
        }
        Ok(touched)
    }

    pub fn list_participants(&self) -> Vec<ParticipantView> {
        match &self.room {
            Some(room) => room.views(self.now(), self.ctx.online_threshold),
            None => Vec::new(),
        }
    }

    /// 접속 중인 모든 연결로 전달. 수신자가 없어도 방 활동으로 기록
    pub async fn broadcast(&mut self, message: RoomMessage) -> Result<usize, RoomError> {
        let delivered = self.ctx.transport.deliver(&self.resource_id, &message);

        let now = self.now();
        if let Some(room) = self.room.as_mut() {
            room.touch(now);
            self.persist().await?;
        }

        tracing::debug!(
            resource_id = %self.resource_id,
            kind = ?message.kind,
            delivered = delivered,
            "Broadcast sent"
        );
        Ok(delivered)
    }

    /// 편집 내용 전파 + 작성자 활동 기록
    pub async fn apply_resource_update(
        &mut self,
        payload: Value,
        participant_id: &str,
    ) -> Result<usize, RoomError> {
        if self.room.is_none() {
            return Err(RoomError::RoomNotInitialized);
        }

        let message = RoomMessage::new(MessageType::ResourceUpdate, self.now())
            .with_payload(payload)
            .with_sender(participant_id);
        let delivered = self.broadcast(message).await?;
        self.update_activity(participant_id).await?;
        Ok(delivered)
    }

    pub fn stats(&self) -> Result<RoomStats, RoomError> {
        let room = self.room.as_ref().ok_or(RoomError::RoomNotInitialized)?;
        let now = self.now();

        Ok(RoomStats {
            resource_id: room.resource_id.clone(),
            total_participants: room.participants.len(),
            online_participants: room.online_count(now, self.ctx.online_threshold),
            created_at: room.created_at,
            updated_at: room.updated_at,
        })
    }

    /// stale 참여자 정리. 제거된 id 목록 반환.
    /// 초기화된 방이면 제거 여부와 관계없이 updated_at 갱신 후 한 번 저장
    pub async fn cleanup_stale(&mut self) -> Result<Vec<String>, RoomError> {
        let now = self.now();
        let Some(room) = self.room.as_mut() else {
            return Ok(Vec::new());
        };

        let removed = room.evict_stale(now, self.ctx.stale_threshold);
        room.touch(now);
        self.persist().await?;

        if !removed.is_empty() {
            tracing::info!(
                resource_id = %self.resource_id,
                removed = ?removed,
                "Stale participants cleaned up"
            );
        }
        Ok(removed)
    }
}
