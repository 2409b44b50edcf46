//! 환경 변수 기반 설정 관리

use crate::room::{ONLINE_THRESHOLD, STALE_THRESHOLD};
use std::env;
use std::time::Duration;

/// 서버 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
    pub room: RoomConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub log_level: String,
}

/// 방 설정
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// 표시용 online 판정 기준
    pub online_threshold: Duration,
    /// 자동 정리 기준
    pub stale_threshold: Duration,
    pub cleanup_interval: Duration,
    pub idle_shutdown: Duration,
    /// 코디네이터 응답 대기 한도
    pub request_timeout: Duration,
    pub command_buffer: usize,
}

/// 저장소 설정
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// None이면 인메모리 저장소
    pub dir: Option<String>,
}

/// 토큰/접근 제어 설정
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub token_secret: String,
    pub token_ttl: u64,
    /// `resource=user|user;resource=*`, None이면 모두 허용
    pub grants: Option<String>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            online_threshold: ONLINE_THRESHOLD,
            stale_threshold: STALE_THRESHOLD,
            cleanup_interval: Duration::from_secs(300),
            idle_shutdown: Duration::from_secs(600),
            request_timeout: Duration::from_secs(10),
            command_buffer: 256,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5600,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["*".to_string()],
            room: RoomConfig::default(),
            storage: StorageConfig { dir: None },
            auth: AuthConfig {
                token_secret: String::new(),
                token_ttl: 3600,
                grants: None,
            },
            log_level: "info".to_string(),
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// 환경 변수에서 설정 로드
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        Self {
            port: parse_or("PORT", defaults.port),
            host: env::var("HOST").unwrap_or(defaults.host),
            cors_origins: match env::var("CORS_ORIGINS") {
                Ok(origins) => origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                Err(_) => defaults.cors_origins,
            },
            room: RoomConfig {
                online_threshold: Duration::from_millis(parse_or(
                    "ROOM_ONLINE_THRESHOLD_MS",
                    defaults.room.online_threshold.as_millis() as u64,
                )),
                stale_threshold: Duration::from_millis(parse_or(
                    "ROOM_STALE_THRESHOLD_MS",
                    defaults.room.stale_threshold.as_millis() as u64,
                )),
                cleanup_interval: Duration::from_secs(parse_or(
                    "ROOM_CLEANUP_INTERVAL_SECS",
                    defaults.room.cleanup_interval.as_secs(),
                )),
                idle_shutdown: Duration::from_secs(parse_or(
                    "ROOM_IDLE_SHUTDOWN_SECS",
                    defaults.room.idle_shutdown.as_secs(),
                )),
                request_timeout: Duration::from_millis(parse_or(
                    "ROOM_REQUEST_TIMEOUT_MS",
                    defaults.room.request_timeout.as_millis() as u64,
                )),
                command_buffer: parse_or("ROOM_COMMAND_BUFFER", defaults.room.command_buffer),
            },
            storage: StorageConfig {
                dir: non_empty("STORAGE_DIR"),
            },
            auth: AuthConfig {
                token_secret: env::var("AUTH_TOKEN_SECRET").unwrap_or_default(),
                token_ttl: parse_or("AUTH_TOKEN_TTL_SECS", defaults.auth.token_ttl),
                grants: non_empty("ROOM_GRANTS"),
            },
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
