//! 방 상태 영속 저장소

use crate::error::StoreError;
use crate::room::model::{decode_room, encode_room, Room};
use dashmap::DashMap;
use futures::future::BoxFuture;
use sha1::{Digest, Sha1};
use std::path::PathBuf;

/// 이보다 긴 hex 파일명은 앞부분 + SHA-1 digest로 줄임 (파일명 255바이트 제한)
const MAX_HEX_NAME: usize = 96;

/// 코디네이터 전용 key-value 저장소
pub trait RoomStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Room>, StoreError>>;
    fn put<'a>(&'a self, key: &'a str, room: &'a Room) -> BoxFuture<'a, Result<(), StoreError>>;
    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>>;
}

/// 인메모리 저장소 (STORAGE_DIR 미설정 시)
#[derive(Default)]
pub struct MemoryStore {
    rooms: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoomStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Room>, StoreError>> {
        Box::pin(async move {
            // DashMap Ref는 await 전에 해제
            let raw = self.rooms.get(key).map(|r| r.value().clone());
            raw.map(|raw| decode_room(&raw)).transpose()
        })
    }

    fn put<'a>(&'a self, key: &'a str, room: &'a Room) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let raw = encode_room(room)?;
            self.rooms.insert(key.to_string(), raw);
            Ok(())
        })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>> {
        Box::pin(async move { Ok(self.rooms.iter().map(|r| r.key().clone()).collect()) })
    }
}

/// 파일 저장소: 방 하나당 JSON 파일 하나
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::info!(dir = %dir.display(), "File store opened");
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }
}

impl RoomStore for FileStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Room>, StoreError>> {
        Box::pin(async move {
            match tokio::fs::read_to_string(self.path_for(key)).await {
                // 해시 파일명이 다른 id와 겹친 경우는 없는 방으로 취급
                Ok(raw) => Ok(Some(decode_room(&raw)?).filter(|room| room.resource_id == key)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn put<'a>(&'a self, key: &'a str, room: &'a Room) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let raw = encode_room(room)?;
            let path = self.path_for(key);
            let tmp = path.with_extension("json.tmp");
            tokio::fs::write(&tmp, raw).await?;
            tokio::fs::rename(&tmp, &path).await?;
            Ok(())
        })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>> {
        Box::pin(async move {
            let mut keys = Vec::new();
            let mut entries = tokio::fs::read_dir(&self.dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    continue;
                }
                // 파일명은 줄여졌을 수 있으므로 id는 파일 내용에서 읽음
                let raw = tokio::fs::read_to_string(&path).await?;
                match decode_room(&raw) {
                    Ok(room) => keys.push(room.resource_id),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable room file")
                    }
                }
            }
            Ok(keys)
        })
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// 리소스 id -> 파일명. 짧으면 hex, 길면 hex 앞부분 + SHA-1
fn encode_key(key: &str) -> String {
    let encoded = hex(key.as_bytes());
    if encoded.len() <= MAX_HEX_NAME {
        return encoded;
    }
    format!("{}-{}", &encoded[..MAX_HEX_NAME / 2], hex(&Sha1::digest(key.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::model::ParticipantMeta;

    fn sample_room() -> Room {
        let mut room = Room::new("task/42 ü".into(), 1_000);
        room.upsert_participant(
            "u1",
            ParticipantMeta {
                display_name: Some("Alice".into()),
                email: None,
            },
            2_000,
        );
        room
    }

    #[test]
    fn file_names_stay_short() {
        assert_eq!(encode_key("task-1"), "7461736b2d31");
        let long = "x".repeat(4_096);
        let name = encode_key(&long);
        assert_eq!(name.len(), MAX_HEX_NAME / 2 + 1 + 40);
        assert_ne!(name, encode_key(&format!("{}y", long)));
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.get("missing").await.unwrap().is_none());

        let room = sample_room();
        store.put(&room.resource_id, &room).await.unwrap();
        assert_eq!(store.get(&room.resource_id).await.unwrap(), Some(room.clone()));
        assert_eq!(store.keys().await.unwrap(), vec![room.resource_id]);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let room = sample_room();
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.put(&room.resource_id, &room).await.unwrap();
        }

        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get(&room.resource_id).await.unwrap(), Some(room.clone()));
        assert_eq!(reopened.keys().await.unwrap(), vec![room.resource_id]);
        assert!(reopened.get("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_reports_corrupt_rooms() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        tokio::fs::write(store.path_for("bad"), "{not json").await.unwrap();
        assert!(matches!(store.get("bad").await, Err(StoreError::Codec(_))));
    }

    #[tokio::test]
    async fn file_store_accepts_long_resource_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let long_id = format!("workspace/{}/task-1", "a".repeat(130));
        let room = Room::new(long_id.clone(), 1_000);

        store.put(&long_id, &room).await.unwrap();
        assert_eq!(store.get(&long_id).await.unwrap(), Some(room));
        assert_eq!(store.keys().await.unwrap(), vec![long_id.clone()]);

        let sibling = format!("{}-2", &long_id[..long_id.len() - 2]);
        assert!(store.get(&sibling).await.unwrap().is_none());
    }
}
