//! 핸들러 모듈

pub mod auth;
pub mod connection;
pub mod room;

pub use connection::*;
pub use room::*;
