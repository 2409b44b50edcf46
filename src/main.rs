//! TaskRoom 협업 방 코디네이터 서버

mod clock;
mod config;
mod error;
mod handlers;
mod protocol;
mod room;
mod state;
mod store;
mod transport;

use anyhow::Context;
use axum::{
    http::HeaderValue,
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use clock::Clock;
use config::Config;
use handlers::auth::{Identity, TokenAuthority};
use state::AppState;
use std::sync::Arc;
use store::{FileStore, MemoryStore, RoomStore};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    // 로깅 초기화
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("issue-token") {
        return issue_token(&config, &args[1..]);
    }

    let store: Arc<dyn RoomStore> = match &config.storage.dir {
        Some(dir) => Arc::new(
            FileStore::open(dir)
                .await
                .with_context(|| format!("failed to open storage dir {}", dir))?,
        ),
        None => {
            tracing::warn!("STORAGE_DIR not set, room state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    match store.keys().await {
        Ok(keys) => tracing::info!(stored_rooms = keys.len(), "Room store ready"),
        Err(e) => tracing::warn!(error = %e, "Failed to list stored rooms"),
    }

    let state = Arc::new(AppState::new(config.clone(), store));

    // stale 참여자 정리 스케줄러
    let cleanup_state = state.clone();
    let cleanup_interval = config.room.cleanup_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            interval.tick().await;
            handlers::cleanup_stale_rooms(cleanup_state.clone()).await;
        }
    });

    let app = app(state, &config.cors_origins);

    let addr = config.server_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!("🚀 TaskRoom coordinator started");
    tracing::info!("Address: {}", addr);
    tracing::info!("WebSocket: ws://{}/rooms/:resource_id/ws", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// `issue-token <participant-id> [display-name] [email]`
fn issue_token(config: &Config, args: &[String]) -> anyhow::Result<()> {
    let authority = TokenAuthority::new(&config.auth.token_secret, config.auth.token_ttl)
        .context("AUTH_TOKEN_SECRET must be set to issue tokens")?;
    let id = args
        .first()
        .context("usage: issue-token <participant-id> [display-name] [email]")?;

    let token = authority.issue(&Identity {
        id: id.clone(),
        display_name: args.get(1).cloned(),
        email: args.get(2).cloned(),
    })?;
    println!("{}", token);
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins = origins
        .iter()
        .filter_map(|o| o.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// 라우터 설정
fn app(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/rooms/:resource_id/init", post(handlers::handle_init_room))
        .route("/rooms/:resource_id/users", get(handlers::handle_list_users))
        .route("/rooms/:resource_id/stats", get(handlers::handle_room_stats))
        .route("/rooms/:resource_id/cleanup", post(handlers::handle_cleanup_room))
        .route("/rooms/:resource_id/ws", get(handlers::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

async fn index_handler() -> Html<&'static str> {
    Html("<h1>TaskRoom Coordinator</h1><p>WebSocket endpoint: /rooms/:resource_id/ws</p>")
}

async fn health_handler(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "server": "taskroom-coordinator",
        "timestamp": state.clock.now_ms(),
        "activeRooms": state.rooms.active_rooms(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::room::coordinator::tests::FlakyStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tower::ServiceExt;

    const T0: i64 = 1_700_000_000_000;

    struct TestApp {
        state: Arc<AppState>,
        clock: ManualClock,
        authority: TokenAuthority,
    }

    impl TestApp {
        fn new(grants: Option<&str>) -> Self {
            Self::with_store(grants, Arc::new(MemoryStore::new()))
        }

        fn with_store(grants: Option<&str>, store: Arc<dyn RoomStore>) -> Self {
            let mut config = Config::default();
            config.auth.token_secret = "test-secret".into();
            config.auth.grants = grants.map(str::to_string);
            let clock = ManualClock::new(T0);
            let state = Arc::new(AppState::with_clock(config, store, Arc::new(clock.clone())));
            Self {
                state,
                clock,
                authority: TokenAuthority::new("test-secret", 3600).unwrap(),
            }
        }

        fn token(&self, id: &str) -> String {
            self.authority
                .issue(&Identity {
                    id: id.into(),
                    email: None,
                    display_name: Some(id.to_uppercase()),
                })
                .unwrap()
        }

        async fn call(&self, method: &str, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
            let mut req = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }
            let res = app(self.state.clone(), &[])
                .oneshot(req.body(Body::empty()).unwrap())
                .await
                .unwrap();
            let status = res.status();
            let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, body)
        }
    }

    #[tokio::test]
    async fn control_surface_scenario() {
        let app = TestApp::new(None);
        let token = app.token("u1");

        let (status, body) = app.call("GET", "/rooms/task-42/stats", Some(&token)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "ROOM_NOT_INITIALIZED");

        let (status, body) = app.call("GET", "/rooms/task-42/users", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));

        let (status, body) = app.call("POST", "/rooms/task-42/init", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        app.state
            .rooms
            .add_user("task-42", "u1", room::ParticipantMeta::default())
            .await
            .unwrap();

        let (_, body) = app.call("GET", "/rooms/task-42/stats", Some(&token)).await;
        assert_eq!(body["resourceId"], "task-42");
        assert_eq!(body["totalParticipants"], 1);
        assert_eq!(body["onlineParticipants"], 1);

        let (_, body) = app.call("GET", "/rooms/task-42/users", Some(&token)).await;
        assert_eq!(body[0]["id"], "u1");
        assert_eq!(body[0]["online"], true);
    }

    #[tokio::test]
    async fn cleanup_endpoint_evicts_stale() {
        let app = TestApp::new(None);
        let token = app.token("u1");
        app.call("POST", "/rooms/task-1/init", Some(&token)).await;
        app.state
            .rooms
            .add_user("task-1", "u9", room::ParticipantMeta::default())
            .await
            .unwrap();

        app.clock.advance(Duration::from_secs(31 * 60));
        let (status, body) = app.call("POST", "/rooms/task-1/cleanup", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"success": true, "removed": 1}));
    }

    #[tokio::test]
    async fn storage_failure_is_a_generic_internal_error() {
        let store = Arc::new(FlakyStore::default());
        store.fail_put.store(true, Ordering::SeqCst);
        let app = TestApp::with_store(None, store);
        let token = app.token("u1");

        let (status, body) = app.call("POST", "/rooms/task-1/init", Some(&token)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "INTERNAL_ERROR");
        assert_eq!(body["message"], "internal error");
    }

    #[tokio::test]
    async fn rejects_missing_or_unauthorized_callers() {
        let app = TestApp::new(Some("task-1=u1"));

        let (status, _) = app.call("GET", "/rooms/task-1/users", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app.call("GET", "/rooms/task-1/users", Some("bogus.token")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = app
            .call("GET", "/rooms/task-1/users", Some(&app.token("u2")))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "ACCESS_DENIED");

        let (status, _) = app
            .call("GET", "/rooms/task-1/users", Some(&app.token("u1")))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn query_token_is_accepted() {
        let app = TestApp::new(None);
        let uri = format!("/rooms/task-1/users?token={}", app.token("u1"));
        let (status, _) = app.call("GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_routes_and_methods() {
        let app = TestApp::new(None);
        let token = app.token("u1");

        let (status, _) = app.call("GET", "/rooms/task-1/nope", Some(&token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app.call("DELETE", "/rooms/task-1/stats", Some(&token)).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn health_reports_status() {
        let app = TestApp::new(None);
        let (status, body) = app.call("GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["timestamp"], T0);
    }
}
