//! 애플리케이션 상태 관리

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::AuthError;
use crate::handlers::auth::{bearer_token, AccessPolicy, Identity, TokenAuthority};
use crate::room::{RoomContext, RoomRegistry};
use crate::store::RoomStore;
use crate::transport::ConnectionHub;
use axum::http::HeaderMap;
use std::sync::Arc;

/// 전역 애플리케이션 상태
pub struct AppState {
    /// 방 코디네이터 (resource_id -> actor)
    pub rooms: RoomRegistry,
    /// 소켓 연결 (connection_id -> Connection)
    pub hub: Arc<ConnectionHub>,
    pub tokens: Option<TokenAuthority>,
    pub access: AccessPolicy,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn RoomStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Config, store: Arc<dyn RoomStore>, clock: Arc<dyn Clock>) -> Self {
        let hub = Arc::new(ConnectionHub::new());
        let ctx = RoomContext {
            store,
            transport: hub.clone(),
            clock: clock.clone(),
            online_threshold: config.room.online_threshold,
            stale_threshold: config.room.stale_threshold,
        };

        if config.auth.token_secret.is_empty() {
            tracing::warn!("AUTH_TOKEN_SECRET not set, room access is disabled");
        }

        Self {
            rooms: RoomRegistry::new(ctx, &config.room),
            hub,
            tokens: TokenAuthority::new(&config.auth.token_secret, config.auth.token_ttl),
            access: AccessPolicy::parse(config.auth.grants.as_deref()),
            clock,
        }
    }

    /// 토큰 검증 + 방 접근 권한 확인
    pub fn authorize(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
        resource_id: &str,
    ) -> Result<Identity, AuthError> {
        let tokens = self.tokens.as_ref().ok_or(AuthError::NotConfigured)?;
        let token = bearer_token(headers, query_token).ok_or(AuthError::AuthenticationFailed)?;
        let identity = tokens.verify(token)?;

        if !self.access.may_join(resource_id, &identity.id) {
            tracing::warn!(
                resource_id = %resource_id,
                participant_id = %identity.id,
                "Room access denied"
            );
            return Err(AuthError::AccessDenied);
        }
        Ok(identity)
    }
}
