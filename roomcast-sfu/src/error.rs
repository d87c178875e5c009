//! Error types for the SFU core

use crate::types::RoomId;
use thiserror::Error;

/// SFU error types
#[derive(Debug, Error)]
pub enum SfuError {
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Invalid session description: {0}")]
    InvalidSdp(String),

    #[error("Room closed: {0}")]
    RoomClosed(RoomId),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type for SFU operations
pub type Result<T> = std::result::Result<T, SfuError>;
