//! Peer transports for kernel event fan-out.
//!
//! Provides:
//! - Wire protocol for peer connections (JSON frames)
//! - `WebSocketHub` - Axum-backed peer set (feature: websocket)
//! - `LocalHub` - In-process peer set for tests and embedders

pub mod memory;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod hub;

pub use memory::LocalHub;
pub use protocol::{OutboundFrame, PeerMessage};

#[cfg(feature = "websocket")]
pub use hub::{WebSocketHub, WsState, create_ws_router, ws_handler};
