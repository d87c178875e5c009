//! Transport seams between the SFU core and the media stack
//!
//! The room, peer and forwarding logic only talk to these traits. The
//! production implementation lives in [`crate::rtc`] on top of `webrtc`;
//! tests plug in in-memory transports.
//!
//! Events flow the other way through [`ConnectionHandler`], which is
//! registered exactly once when a connection is created.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use webrtc::rtp::packet::Packet as RtpPacket;

/// Session description kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description as exchanged with the client (`{"type": "offer", "sdp": "..."}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Codec of an inbound track, copied onto every outbound track created for it
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackCodec {
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub sdp_fmtp_line: String,
}

/// Outbound track to attach to a destination connection
#[derive(Debug, Clone)]
pub struct OutboundTrackSpec {
    pub codec: TrackCodec,
    pub track_id: String,
    pub stream_id: String,
}

/// Peer connection state, as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// The connection will not carry media again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

/// Inbound media stream published by a peer
#[async_trait]
pub trait InboundTrack: Send + Sync {
    fn id(&self) -> String;

    fn kind(&self) -> TrackKind;

    fn codec(&self) -> TrackCodec;

    /// Next RTP packet, or `Ok(None)` once the stream ended cleanly.
    async fn read_packet(&self) -> Result<Option<RtpPacket>>;
}

/// Writable side of an outbound track
#[async_trait]
pub trait PacketSink: Send + Sync {
    async fn write_packet(&self, packet: &RtpPacket) -> Result<()>;
}

/// Transport feedback (RTCP) arriving for an outbound stream
#[async_trait]
pub trait FeedbackSource: Send + Sync {
    /// Reads the next feedback batch and returns how many packets it held.
    /// Errors once the stream is closed.
    async fn read_feedback(&self) -> Result<usize>;
}

/// Data channel a peer negotiated for control messages
#[async_trait]
pub trait DataSink: Send + Sync {
    fn label(&self) -> String;

    async fn send(&self, payload: &Bytes) -> Result<()>;
}

/// Outbound stream attached to a destination connection
#[derive(Clone)]
pub struct OutboundStream {
    pub sink: Arc<dyn PacketSink>,
    pub feedback: Arc<dyn FeedbackSource>,
}

/// One negotiated media connection
#[async_trait]
pub trait MediaConnection: Send + Sync {
    async fn set_remote_description(&self, offer: SessionDescription) -> Result<()>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, answer: SessionDescription) -> Result<()>;

    async fn local_description(&self) -> Option<SessionDescription>;

    async fn add_outbound_track(&self, spec: &OutboundTrackSpec) -> Result<OutboundStream>;

    async fn close(&self) -> Result<()>;
}

/// Per-connection event callbacks
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn on_track(&self, track: Arc<dyn InboundTrack>);

    async fn on_data_channel(&self, channel: Arc<dyn DataSink>);

    async fn on_data_message(&self, payload: Bytes);

    async fn on_state_change(&self, state: ConnectionState);

    /// Trickled local candidate (`None` once gathering finished)
    async fn on_ice_candidate(&self, candidate: Option<String>);
}

/// Creates media connections with the handler wired in
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(&self, handler: Arc<dyn ConnectionHandler>) -> Result<Arc<dyn MediaConnection>>;
}
