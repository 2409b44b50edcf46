//! 에러 타입 및 HTTP 응답 변환

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// 저장소 에러
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored room is corrupt: {0}")]
    Codec(#[from] serde_json::Error),
}

/// 방 코디네이터 에러
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room is not initialized")]
    RoomNotInitialized,
    #[error("room coordinator is unavailable")]
    TransportUnavailable,
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

/// 게이트웨이 인증/권한 에러
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("access denied")]
    AccessDenied,
    #[error("token authority is not configured")]
    NotConfigured,
}

/// HTTP 핸들러 에러
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Room(RoomError::RoomNotInitialized) => {
                (StatusCode::CONFLICT, "ROOM_NOT_INITIALIZED")
            }
            ApiError::Room(RoomError::TransportUnavailable) | ApiError::Auth(AuthError::NotConfigured) => {
                (StatusCode::SERVICE_UNAVAILABLE, "TRANSPORT_UNAVAILABLE")
            }
            ApiError::Room(RoomError::Storage(_)) | ApiError::Room(RoomError::Internal(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
            ApiError::Auth(AuthError::AuthenticationFailed) => {
                (StatusCode::UNAUTHORIZED, "AUTHENTICATION_FAILED")
            }
            ApiError::Auth(AuthError::AccessDenied) => (StatusCode::FORBIDDEN, "ACCESS_DENIED"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        // 내부 에러 상세는 로그에만 남김
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(serde_json::json!({
                "code": code,
                "message": message,
            })),
        )
            .into_response()
    }
}
