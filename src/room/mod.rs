//! 협업 방 코디네이터

pub mod actor;
pub mod coordinator;
pub mod model;

pub use actor::RoomRegistry;
pub use coordinator::RoomContext;
pub use model::{ParticipantMeta, ONLINE_THRESHOLD, STALE_THRESHOLD};
