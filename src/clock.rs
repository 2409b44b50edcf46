//! 시간 소스 (epoch millis)

use std::time::{SystemTime, UNIX_EPOCH};

/// 현재 시각을 epoch 밀리초로 반환하는 시계
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// 시스템 시계
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

#[cfg(test)]
pub use manual::ManualClock;
