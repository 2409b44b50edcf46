//! 접속 중인 소켓으로의 메시지 전달

use crate::protocol::RoomMessage;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// 방에 접속한 모든 연결로 메시지를 전달하는 전송 계층
pub trait Transport: Send + Sync {
    /// 전달에 성공한 연결 수를 반환
    fn deliver(&self, resource_id: &str, message: &RoomMessage) -> usize;

    /// 참여자의 살아있는 연결이 방에 남아있는지
    fn is_connected(&self, resource_id: &str, participant_id: &str) -> bool;
}

/// 소켓 연결 정보
pub struct Connection {
    pub resource_id: String,
    pub participant_id: String,
    pub sender: UnboundedSender<RoomMessage>,
    pub connected_at: Instant,
}

/// 연결 레지스트리 (connection_id -> Connection)
#[derive(Default)]
pub struct ConnectionHub {
    connections: DashMap<String, Connection>,
    /// resource_id -> connection ids
    rooms: DashMap<String, HashSet<String>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 새 연결 등록 후 connection id 반환
    pub fn register(
        &self,
        resource_id: &str,
        participant_id: &str,
        sender: UnboundedSender<RoomMessage>,
    ) -> String {
        let connection_id = Uuid::new_v4().to_string();
        self.connections.insert(
            connection_id.clone(),
            Connection {
                resource_id: resource_id.to_string(),
                participant_id: participant_id.to_string(),
                sender,
                connected_at: Instant::now(),
            },
        );
        self.rooms
            .entry(resource_id.to_string())
            .or_default()
            .insert(connection_id.clone());

        tracing::debug!(
            connection_id = %connection_id,
            resource_id = %resource_id,
            participant_id = %participant_id,
            "Connection registered"
        );
        connection_id
    }

    /// 연결 해제. 같은 참여자의 다른 연결이 남아있는지 함께 반환
    pub fn unregister(&self, connection_id: &str) -> Option<(Connection, bool)> {
        let (_, connection) = self.connections.remove(connection_id)?;
        if let Some(mut ids) = self.rooms.get_mut(&connection.resource_id) {
            ids.remove(connection_id);
        }
        self.rooms
            .remove_if(&connection.resource_id, |_, ids| ids.is_empty());

        let still_connected = self.is_connected(&connection.resource_id, &connection.participant_id);
        Some((connection, still_connected))
    }

    /// 특정 연결로만 전송
    pub fn send_to(&self, connection_id: &str, message: RoomMessage) -> bool {
        self.connections
            .get(connection_id)
            .map(|c| c.sender.send(message).is_ok())
            .unwrap_or(false)
    }

    pub fn connection_count(&self, resource_id: &str) -> usize {
        self.rooms.get(resource_id).map(|ids| ids.len()).unwrap_or(0)
    }

    /// 방의 connection id 스냅샷 (인덱스 락은 바로 해제)
    fn connection_ids(&self, resource_id: &str) -> Vec<String> {
        self.rooms
            .get(resource_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Transport for ConnectionHub {
    fn deliver(&self, resource_id: &str, message: &RoomMessage) -> usize {
        let mut delivered = 0;
        for connection_id in self.connection_ids(resource_id) {
            let Some(connection) = self.connections.get(&connection_id) else {
                continue;
            };
            match connection.sender.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::warn!(
                    connection_id = %connection_id,
                    resource_id = %resource_id,
                    "Delivery to closed connection skipped"
                ),
            }
        }
        delivered
    }

    fn is_connected(&self, resource_id: &str, participant_id: &str) -> bool {
        self.connection_ids(resource_id).iter().any(|id| {
            self.connections
                .get(id)
                .is_some_and(|c| c.participant_id == participant_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;
    use tokio::sync::mpsc;

    #[test]
    fn delivers_only_to_matching_room() {
        let hub = ConnectionHub::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        hub.register("task-1", "u1", tx_a);
        hub.register("task-2", "u2", tx_b);

        let msg = RoomMessage::new(MessageType::Ping, 1);
        assert_eq!(hub.deliver("task-1", &msg), 1);
        assert_eq!(rx_a.try_recv().unwrap(), msg);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn skips_closed_connections() {
        let hub = ConnectionHub::new();
        let (tx, rx) = mpsc::unbounded_channel();
        hub.register("task-1", "u1", tx);
        drop(rx);
        assert_eq!(hub.deliver("task-1", &RoomMessage::new(MessageType::Ping, 1)), 0);
    }

    #[test]
    fn unregister_reports_remaining_connections() {
        let hub = ConnectionHub::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let first = hub.register("task-1", "u1", tx1);
        let second = hub.register("task-1", "u1", tx2);

        let (_, still_connected) = hub.unregister(&first).unwrap();
        assert!(still_connected);
        let (conn, still_connected) = hub.unregister(&second).unwrap();
        assert!(!still_connected);
        assert_eq!(conn.participant_id, "u1");
        assert!(hub.unregister(&second).is_none());
        assert_eq!(hub.connection_count("task-1"), 0);
    }

    #[test]
    fn room_index_tracks_connections() {
        let hub = ConnectionHub::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let (tx3, _rx3) = mpsc::unbounded_channel();
        let alice = hub.register("task-1", "u1", tx1);
        hub.register("task-1", "u2", tx2);
        hub.register("task-2", "u1", tx3);

        assert_eq!(hub.connection_count("task-1"), 2);
        assert!(hub.is_connected("task-1", "u1"));
        assert!(hub.is_connected("task-2", "u1"));
        assert!(!hub.is_connected("task-2", "u2"));

        hub.unregister(&alice);
        assert!(!hub.is_connected("task-1", "u1"));
        assert!(hub.is_connected("task-2", "u1"));
        assert_eq!(hub.connection_count("task-1"), 1);
        assert_eq!(hub.deliver("task-1", &RoomMessage::new(MessageType::Ping, 1)), 1);
    }
}
