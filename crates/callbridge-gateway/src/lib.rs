//! Callbridge Gateway: hosts one voice session per telephony media-stream WebSocket.

pub mod config;
pub mod server;

pub use config::GatewayConfig;
pub use server::{router, AppState, PlaybackFactory};
