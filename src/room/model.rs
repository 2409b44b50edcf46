//! 방/참여자 상태 모델

use crate::error::StoreError;
use crate::protocol::ParticipantView;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// 표시용 온라인 판정 기준 (정보 제공용)
pub const ONLINE_THRESHOLD: Duration = Duration::from_secs(5 * 60);
/// 자동 정리 기준 (메모리 상한 확보용, ONLINE_THRESHOLD와 독립)
pub const STALE_THRESHOLD: Duration = Duration::from_secs(30 * 60);

/// Duration을 밀리초로 변환 (i64 범위를 넘으면 i64::MAX)
pub fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// 마지막 활동 이후 경과 시간이 threshold 이내이면 온라인
pub fn is_online(now_ms: i64, last_activity_ms: i64, threshold: Duration) -> bool {
    now_ms.saturating_sub(last_activity_ms) <= millis(threshold)
}

/// 등록 시점에 전달되는 참여자 메타데이터
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantMeta {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// 참여자 정보
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub connected_at: i64,
    pub last_activity_at: i64,
}

impl Participant {
    pub fn view(&self, now_ms: i64, online_threshold: Duration) -> ParticipantView {
        ParticipantView {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            email: self.email.clone(),
            connected_at: self.connected_at,
            last_activity_at: self.last_activity_at,
            online: is_online(now_ms, self.last_activity_at, online_threshold),
        }
    }
}

/// 방 정보 (리소스 하나당 하나)
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub resource_id: String,
    pub participants: HashMap<String, Participant>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Room {
    pub fn new(resource_id: String, now_ms: i64) -> Self {
        Self {
            resource_id,
            participants: HashMap::new(),
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// updated_at 갱신 (뒤로 가지 않음)
    pub fn touch(&mut self, now_ms: i64) {
        self.updated_at = self.updated_at.max(now_ms);
    }

    /// 참여자 등록 (재접속이면 덮어씀)
    pub fn upsert_participant(&mut self, id: &str, meta: ParticipantMeta, now_ms: i64) {
        self.participants.insert(
            id.to_string(),
            Participant {
                id: id.to_string(),
                display_name: meta.display_name,
                email: meta.email,
                connected_at: now_ms,
                last_activity_at: now_ms,
            },
        );
        self.touch(now_ms);
    }

    pub fn remove_participant(&mut self, id: &str, now_ms: i64) -> bool {
        let removed = self.participants.remove(id).is_some();
        if removed {
            self.touch(now_ms);
        }
        removed
    }

    pub fn record_activity(&mut self, id: &str, now_ms: i64) -> bool {
        match self.participants.get_mut(id) {
            Some(participant) => {
                participant.last_activity_at = now_ms;
                self.touch(now_ms);
                true
            }
            None => false,
        }
    }

    /// 접속 순서로 정렬된 참여자 목록
    pub fn views(&self, now_ms: i64, online_threshold: Duration) -> Vec<ParticipantView> {
        let mut views: Vec<ParticipantView> = self
            .participants
            .values()
            .map(|p| p.view(now_ms, online_threshold))
            .collect();
        views.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then_with(|| a.id.cmp(&b.id)));
        views
    }

    pub fn online_count(&self, now_ms: i64, online_threshold: Duration) -> usize {
        self.participants
            .values()
            .filter(|p| is_online(now_ms, p.last_activity_at, online_threshold))
            .count()
    }

    /// stale 참여자 제거 후 제거된 id 목록 반환. updated_at은 호출자가 갱신
    pub fn evict_stale(&mut self, now_ms: i64, stale_threshold: Duration) -> Vec<String> {
        let cutoff = now_ms.saturating_sub(millis(stale_threshold));
        let stale: Vec<String> = self
            .participants
            .values()
            .filter(|p| p.last_activity_at < cutoff)
            .map(|p| p.id.clone())
            .collect();

        for id in &stale {
            self.participants.remove(id);
        }
        stale
    }
}

/// 저장 형식: 참여자 맵을 배열로 펼침
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRoom {
    resource_id: String,
    participants: Vec<Participant>,
    created_at: i64,
    updated_at: i64,
}

pub(crate) fn encode_room(room: &Room) -> Result<String, StoreError> {
    let mut participants: Vec<Participant> = room.participants.values().cloned().collect();
    participants.sort_by(|a, b| a.id.cmp(&b.id));

    let stored = StoredRoom {
        resource_id: room.resource_id.clone(),
        participants,
        created_at: room.created_at,
        updated_at: room.updated_at,
    };
    Ok(serde_json::to_string(&stored)?)
}

pub(crate) fn decode_room(raw: &str) -> Result<Room, StoreError> {
    let stored: StoredRoom = serde_json::from_str(raw)?;
    let participants = stored
        .participants
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();

    Ok(Room {
        resource_id: stored.resource_id,
        participants,
        created_at: stored.created_at,
        updated_at: stored.updated_at.max(stored.created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const T0: i64 = 1_700_000_000_000;

    fn meta(name: &str) -> ParticipantMeta {
        ParticipantMeta {
            display_name: Some(name.to_string()),
            email: None,
        }
    }

    #[test]
    fn online_boundary_is_inclusive() {
        let five_min = ONLINE_THRESHOLD.as_millis() as i64;
        assert!(is_online(T0 + five_min, T0, ONLINE_THRESHOLD));
        assert!(!is_online(T0 + five_min + 1, T0, ONLINE_THRESHOLD));
    }

    #[test]
    fn huge_thresholds_do_not_wrap() {
        let forever = Duration::from_secs(u64::MAX);
        assert_eq!(millis(forever), i64::MAX);
        assert!(is_online(T0, 0, forever));

        let mut room = Room::new("task-1".into(), 0);
        room.upsert_participant("u1", meta("Alice"), 0);
        assert!(room.evict_stale(T0, forever).is_empty());
        assert!(room.participants.contains_key("u1"));
    }

    #[test]
    fn reregistration_overwrites_entry() {
        let mut room = Room::new("task-1".into(), T0);
        room.upsert_participant("u1", meta("Alice"), T0);
        room.upsert_participant("u1", meta("Alice 2"), T0 + 1_000);

        assert_eq!(room.participants.len(), 1);
        let p = &room.participants["u1"];
        assert_eq!(p.connected_at, T0 + 1_000);
        assert_eq!(p.display_name.as_deref(), Some("Alice 2"));
    }

    #[test]
    fn touch_never_moves_backwards() {
        let mut room = Room::new("task-1".into(), T0);
        room.touch(T0 - 10);
        assert_eq!(room.updated_at, T0);
    }

    #[test]
    fn evicts_only_strictly_older_than_cutoff() {
        let stale_ms = STALE_THRESHOLD.as_millis() as i64;
        let now = T0 + stale_ms;
        let mut room = Room::new("task-1".into(), T0);
        room.upsert_participant("edge", meta("Edge"), T0);
        room.upsert_participant("old", meta("Old"), T0 - 1);
        room.upsert_participant("fresh", meta("Fresh"), now);

        let removed = room.evict_stale(now, STALE_THRESHOLD);
        assert_eq!(removed, vec!["old".to_string()]);
        assert!(room.participants.contains_key("edge"));
        assert!(room.participants.contains_key("fresh"));
    }

    #[test]
    fn codec_preserves_participants_and_timestamps() {
        let mut room = Room::new("task-9".into(), T0);
        room.upsert_participant("u1", meta("Alice"), T0 + 5);
        room.upsert_participant(
            "u2",
            ParticipantMeta {
                display_name: None,
                email: Some("bob@example.com".into()),
            },
            T0 + 9,
        );

        let decoded = decode_room(&encode_room(&room).unwrap()).unwrap();
        assert_eq!(decoded, room);
    }

    #[test]
    fn stored_form_is_a_participant_array() {
        let mut room = Room::new("task-9".into(), T0);
        room.upsert_participant("u1", meta("Alice"), T0);
        let value: serde_json::Value = serde_json::from_str(&encode_room(&room).unwrap()).unwrap();
        assert!(value["participants"].is_array());
        assert_eq!(value["participants"][0]["displayName"], "Alice");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8),
        Remove(u8),
        Activity(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6).prop_map(Op::Add),
            (0u8..6).prop_map(Op::Remove),
            (0u8..6).prop_map(Op::Activity),
        ]
    }

    proptest! {
        #[test]
        fn at_most_one_entry_per_participant(ops in proptest::collection::vec(op(), 0..64)) {
            let mut room = Room::new("task-p".into(), T0);
            let mut now = T0;
            for op in ops {
                now += 1;
                match op {
                    Op::Add(id) => room.upsert_participant(&format!("u{id}"), ParticipantMeta::default(), now),
                    Op::Remove(id) => { room.remove_participant(&format!("u{id}"), now); }
                    Op::Activity(id) => { room.record_activity(&format!("u{id}"), now); }
                }
                let mut ids: Vec<&String> = room.participants.values().map(|p| &p.id).collect();
                let total = ids.len();
                ids.sort();
                ids.dedup();
                prop_assert_eq!(ids.len(), total);
                for (key, p) in &room.participants {
                    prop_assert_eq!(key, &p.id);
                }
                prop_assert!(room.updated_at >= room.created_at);
            }
        }
    }
}
