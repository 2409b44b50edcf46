//! 리소스별 코디네이터 액터와 레지스트리

use crate::config::RoomConfig;
use crate::error::RoomError;
use crate::protocol::{ParticipantView, RoomMessage, RoomStats};
use crate::room::coordinator::{RoomContext, RoomCoordinator};
use crate::room::model::ParticipantMeta;
use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

pub type Reply<T> = oneshot::Sender<Result<T, RoomError>>;

/// 코디네이터 액터 명령
#[derive(Debug)]
pub enum RoomCommand {
    Initialize {
        reply: Reply<()>,
    },
    EnsureInitialized {
        reply: Reply<bool>,
    },
    AddUser {
        participant_id: String,
        meta: ParticipantMeta,
        reply: Reply<bool>,
    },
    RemoveUser {
        participant_id: String,
        reply: Reply<bool>,
    },
    UpdateActivity {
        participant_id: String,
        reply: Reply<bool>,
    },
    ListParticipants {
        reply: Reply<Vec<ParticipantView>>,
    },
    Broadcast {
        message: RoomMessage,
        reply: Reply<usize>,
    },
    ApplyResourceUpdate {
        payload: Value,
        participant_id: String,
        reply: Reply<usize>,
    },
    Stats {
        reply: Reply<RoomStats>,
    },
    CleanupStale {
        reply: Reply<Vec<String>>,
    },
}

impl RoomCommand {
    /// 주기 정리처럼 방을 메모리에 붙잡아 두면 안 되는 명령
    fn is_maintenance(&self) -> bool {
        matches!(self, RoomCommand::CleanupStale { .. })
    }
}

impl RoomCoordinator {
    async fn handle(&mut self, command: RoomCommand) {
        // 호출자가 이미 포기했어도 명령은 끝까지 적용된다
        match command {
            RoomCommand::Initialize { reply } => {
                let _ = reply.send(self.initialize().await);
            }
            RoomCommand::EnsureInitialized { reply } => {
                let _ = reply.send(self.ensure_initialized().await);
            }
            RoomCommand::AddUser {
                participant_id,
                meta,
                reply,
            } => {
                let _ = reply.send(self.add_user(&participant_id, meta).await);
            }
            RoomCommand::RemoveUser {
                participant_id,
                reply,
            } => {
                let _ = reply.send(self.remove_user(&participant_id).await);
            }
            RoomCommand::UpdateActivity {
                participant_id,
                reply,
            } => {
                let _ = reply.send(self.update_activity(&participant_id).await);
            }
            RoomCommand::ListParticipants { reply } => {
                let _ = reply.send(Ok(self.list_participants()));
            }
            RoomCommand::Broadcast { message, reply } => {
                let _ = reply.send(self.broadcast(message).await);
            }
            RoomCommand::ApplyResourceUpdate {
                payload,
                participant_id,
                reply,
            } => {
                let _ = reply.send(self.apply_resource_update(payload, &participant_id).await);
            }
            RoomCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            RoomCommand::CleanupStale { reply } => {
                let _ = reply.send(self.cleanup_stale().await);
            }
        }
    }
}

/// 액터 수신 루프. idle_timeout 동안 정리 외의 명령이 없으면 inbox를 닫고 남은 명령을 처리한 뒤 종료.
/// `_exited`는 루프가 끝날 때 drop되어 레지스트리에 종료를 알린다.
async fn run(
    resource_id: String,
    ctx: RoomContext,
    mut rx: mpsc::Receiver<RoomCommand>,
    idle_timeout: Duration,
    _exited: watch::Sender<()>,
) {
    let mut coordinator = match RoomCoordinator::activate(resource_id.clone(), ctx).await {
        Ok(coordinator) => coordinator,
        Err(e) => {
            // 대기 중인 호출자는 reply 채널이 닫히면서 Internal 에러를 받음
            tracing::error!(resource_id = %resource_id, error = %e, "Room coordinator failed to start");
            rx.close();
            return;
        }
    };

    let mut deadline = Instant::now() + idle_timeout;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(command)) => {
                if !command.is_maintenance() {
                    deadline = Instant::now() + idle_timeout;
                }
                coordinator.handle(command).await;
            }
            Ok(None) => break,
            Err(_) => {
                rx.close();
                while let Some(command) = rx.recv().await {
                    coordinator.handle(command).await;
                }
                tracing::debug!(resource_id = %coordinator.resource_id(), "Room coordinator idle, shutting down");
                break;
            }
        }
    }
}

/// 코디네이터 액터 핸들
#[derive(Clone)]
pub struct RoomHandle {
    tx: mpsc::Sender<RoomCommand>,
    exited: watch::Receiver<()>,
}

impl RoomHandle {
    pub fn spawn(
        resource_id: String,
        ctx: RoomContext,
        idle_timeout: Duration,
        buffer: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (exited_tx, exited) = watch::channel(());
        tokio::spawn(run(resource_id, ctx, rx, idle_timeout, exited_tx));
        Self { tx, exited }
    }

    /// 더 이상 명령을 받지 않음 (종료 중이거나 종료됨)
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// 남은 명령 처리까지 끝나고 태스크가 종료됨
    pub fn has_exited(&self) -> bool {
        self.exited.has_changed().is_err()
    }
}

/// 리소스 id -> 코디네이터 액터 레지스트리
pub struct RoomRegistry {
    rooms: DashMap<String, RoomHandle>,
    ctx: RoomContext,
    idle_timeout: Duration,
    request_timeout: Duration,
    buffer: usize,
}

impl RoomRegistry {
    pub fn new(ctx: RoomContext, config: &RoomConfig) -> Self {
        Self {
            rooms: DashMap::new(),
            ctx,
            idle_timeout: config.idle_shutdown,
            request_timeout: config.request_timeout,
            buffer: config.command_buffer,
        }
    }

    /// 핸들 조회 또는 생성.
    /// 닫힌 액터는 남은 명령을 모두 처리하고 종료한 뒤에만 교체한다.
    async fn handle(&self, resource_id: &str) -> RoomHandle {
        loop {
            let mut exited = {
                let mut entry = self
                    .rooms
                    .entry(resource_id.to_string())
                    .or_insert_with(|| self.spawn(resource_id));
                if !entry.is_closed() {
                    return entry.clone();
                }
                if entry.has_exited() {
                    *entry = self.spawn(resource_id);
                    return entry.clone();
                }
                entry.exited.clone()
            };
            while exited.changed().await.is_ok() {}
        }
    }

    fn spawn(&self, resource_id: &str) -> RoomHandle {
        tracing::debug!(resource_id = %resource_id, "Spawning room coordinator");
        RoomHandle::spawn(
            resource_id.to_string(),
            self.ctx.clone(),
            self.idle_timeout,
            self.buffer,
        )
    }

    async fn request<T>(
        &self,
        resource_id: &str,
        build: impl Fn(Reply<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        match tokio::time::timeout(self.request_timeout, self.dispatch(resource_id, build)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    resource_id = %resource_id,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Room coordinator did not answer in time"
                );
                Err(RoomError::TransportUnavailable)
            }
        }
    }

    async fn dispatch<T>(
        &self,
        resource_id: &str,
        build: impl Fn(Reply<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        // 전송 실패는 명령이 전달되지 않았다는 뜻이므로 새 액터로 한 번 재시도
        for _ in 0..2 {
            let handle = self.handle(resource_id).await;
            let (reply, rx) = oneshot::channel();
            if handle.tx.send(build(reply)).await.is_err() {
                tracing::debug!(resource_id = %resource_id, "Room coordinator closed, retrying");
                continue;
            }
            return rx.await.map_err(|_| {
                RoomError::Internal("room coordinator stopped before replying".to_string())
            })?;
        }
        tracing::warn!(resource_id = %resource_id, "Room coordinator unavailable");
        Err(RoomError::TransportUnavailable)
    }

    pub async fn initialize(&self, resource_id: &str) -> Result<(), RoomError> {
        self.request(resource_id, |reply| RoomCommand::Initialize { reply })
            .await
    }

    pub async fn ensure_initialized(&self, resource_id: &str) -> Result<bool, RoomError> {
        self.request(resource_id, |reply| RoomCommand::EnsureInitialized { reply })
            .await
    }

    pub async fn add_user(
        &self,
        resource_id: &str,
        participant_id: &str,
        meta: ParticipantMeta,
    ) -> Result<bool, RoomError> {
        self.request(resource_id, |reply| RoomCommand::AddUser {
            participant_id: participant_id.to_string(),
            meta: meta.clone(),
            reply,
        })
        .await
    }

    pub async fn remove_user(&self, resource_id: &str, participant_id: &str) -> Result<bool, RoomError> {
        self.request(resource_id, |reply| RoomCommand::RemoveUser {
            participant_id: participant_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn update_activity(
        &self,
        resource_id: &str,
        participant_id: &str,
    ) -> Result<bool, RoomError> {
        self.request(resource_id, |reply| RoomCommand::UpdateActivity {
            participant_id: participant_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn list_participants(&self, resource_id: &str) -> Result<Vec<ParticipantView>, RoomError> {
        self.request(resource_id, |reply| RoomCommand::ListParticipants { reply })
            .await
    }

    pub async fn broadcast(&self, resource_id: &str, message: RoomMessage) -> Result<usize, RoomError> {
        self.request(resource_id, |reply| RoomCommand::Broadcast {
            message: message.clone(),
            reply,
        })
        .await
    }

    pub async fn apply_resource_update(
        &self,
        resource_id: &str,
        payload: Value,
        participant_id: &str,
    ) -> Result<usize, RoomError> {
        self.request(resource_id, |reply| RoomCommand::ApplyResourceUpdate {
            payload: payload.clone(),
            participant_id: participant_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn stats(&self, resource_id: &str) -> Result<RoomStats, RoomError> {
        self.request(resource_id, |reply| RoomCommand::Stats { reply })
            .await
    }

    pub async fn cleanup_stale(&self, resource_id: &str) -> Result<Vec<String>, RoomError> {
        self.request(resource_id, |reply| RoomCommand::CleanupStale { reply })
            .await
    }

    /// 현재 메모리에 살아있는 액터 수
    pub fn active_rooms(&self) -> usize {
        self.rooms.iter().filter(|r| !r.is_closed()).count()
    }

    /// 종료된 액터 핸들 제거
    pub fn prune_closed(&self) -> usize {
        let before = self.rooms.len();
        self.rooms.retain(|_, handle| !handle.has_exited());
        before - self.rooms.len()
    }

    /// 메모리에 살아있는 방의 stale 참여자 정리.
    /// 종료된 방은 깨우지 않고 다음 활성화 때 정리된다.
    pub async fn sweep_stale(&self) -> usize {
        let live: Vec<(String, RoomHandle)> = self
            .rooms
            .iter()
            .filter(|r| !r.is_closed())
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();

        let mut removed = 0;
        for (resource_id, handle) in live {
            let (reply, rx) = oneshot::channel();
            if handle.tx.send(RoomCommand::CleanupStale { reply }).await.is_err() {
                continue;
            }
            match rx.await {
                Ok(Ok(ids)) => removed += ids.len(),
                Ok(Err(e)) => {
                    tracing::warn!(resource_id = %resource_id, error = %e, "Stale sweep failed for room")
                }
                Err(_) => {}
            }
        }
        removed
    }
}
