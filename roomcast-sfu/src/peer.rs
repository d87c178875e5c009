//! SFU Peer management
//!
//! This module handles:
//! - The peer's media connection and negotiated data channel
//! - The one-shot closed signal observed by forwarding tasks
//! - Peer statistics tracking

use crate::transport::{DataSink, MediaConnection};
use crate::types::PeerId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Internal peer statistics with atomic counters
#[derive(Default)]
struct PeerStatsInner {
    messages_received: AtomicU64,
    send_failures: AtomicU64,
    tracks_published: AtomicU64,
    tracks_subscribed: AtomicU64,
}

/// SFU Peer - one participant's connection inside a room
pub struct SfuPeer {
    /// Peer ID
    pub id: PeerId,

    /// Distinguishes successive joins that reuse the same peer id
    session: String,

    joined_at: DateTime<Utc>,

    connection: Arc<dyn MediaConnection>,

    /// Data channel opened by the client, once negotiated
    data_channel: RwLock<Option<Arc<dyn DataSink>>>,

    /// Fired exactly once, when the peer leaves its room
    closed: CancellationToken,
    closing: AtomicBool,

    stats: PeerStatsInner,
}

impl SfuPeer {
    pub fn new(
        id: PeerId,
        session: impl Into<String>,
        connection: Arc<dyn MediaConnection>,
    ) -> Self {
        Self {
            id,
            session: session.into(),
            joined_at: Utc::now(),
            connection,
            data_channel: RwLock::new(None),
            closed: CancellationToken::new(),
            closing: AtomicBool::new(false),
            stats: PeerStatsInner::default(),
        }
    }

    #[must_use]
    pub fn session(&self) -> &str {
        &self.session
    }

    #[must_use]
    pub const fn joined_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<dyn MediaConnection> {
        &self.connection
    }

    /// Adopt a data channel as this peer's relay channel, replacing any earlier one
    pub fn set_data_channel(&self, channel: Arc<dyn DataSink>) {
        *self.data_channel.write() = Some(channel);
    }

    #[must_use]
    pub fn data_channel(&self) -> Option<Arc<dyn DataSink>> {
        self.data_channel.read().clone()
    }

    /// Token cancelled when the peer leaves its room
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Fire the closed signal. Returns false if it already fired.
    pub(crate) fn signal_closed(&self) -> bool {
        if self.closing.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.closed.cancel();
        true
    }

    /// Close the media connection, giving up after `timeout`.
    pub(crate) async fn close_connection(&self, timeout: Duration) {
        match tokio::time::timeout(timeout, self.connection.close()).await {
            Ok(Ok(())) => debug!(peer_id = %self.id, "Peer connection closed"),
            Ok(Err(e)) => debug!(peer_id = %self.id, error = %e, "Peer connection close failed"),
            Err(_) => warn!(
                peer_id = %self.id,
                timeout_ms = timeout.as_millis() as u64,
                "Peer connection close timed out"
            ),
        }
    }

    pub(crate) fn record_message_received(&self) {
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_failure(&self) {
        self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_track_published(&self) {
        self.stats.tracks_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_track_subscribed(&self) {
        self.stats.tracks_subscribed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get peer statistics
    #[must_use]
    pub fn get_stats(&self) -> PeerStats {
        PeerStats {
            peer_id: self.id.clone(),
            joined_at: self.joined_at,
            has_data_channel: self.data_channel.read().is_some(),
            messages_received: self.stats.messages_received.load(Ordering::Relaxed),
            send_failures: self.stats.send_failures.load(Ordering::Relaxed),
            tracks_published: self.stats.tracks_published.load(Ordering::Relaxed),
            tracks_subscribed: self.stats.tracks_subscribed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for SfuPeer {
    fn drop(&mut self) {
        debug!(peer_id = %self.id, session = %self.session, "SfuPeer dropped");
    }
}

/// Peer statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStats {
    pub peer_id: PeerId,
    pub joined_at: DateTime<Utc>,
    pub has_data_channel: bool,

    /// Data messages relayed to this peer
    pub messages_received: u64,

    /// Data messages that could not be delivered to this peer
    pub send_failures: u64,

    /// Tracks this peer published into the room
    pub tracks_published: u64,

    /// Tracks of other peers forwarded to this peer
    pub tracks_subscribed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SfuError};
    use crate::transport::{OutboundStream, OutboundTrackSpec, SessionDescription};
    use async_trait::async_trait;
    use bytes::Bytes;

    /// Connection whose close never completes
    struct StuckConnection;

    #[async_trait]
    impl MediaConnection for StuckConnection {
        async fn set_remote_description(&self, _offer: SessionDescription) -> Result<()> {
            Ok(())
        }

        async fn create_answer(&self) -> Result<SessionDescription> {
            Ok(SessionDescription::answer("v=0"))
        }

        async fn set_local_description(&self, _answer: SessionDescription) -> Result<()> {
            Ok(())
        }

        async fn local_description(&self) -> Option<SessionDescription> {
            None
        }

        async fn add_outbound_track(&self, _spec: &OutboundTrackSpec) -> Result<OutboundStream> {
            Err(SfuError::ConnectionClosed)
        }

        async fn close(&self) -> Result<()> {
            std::future::pending().await
        }
    }

    struct Channel(&'static str);

    #[async_trait]
    impl DataSink for Channel {
        fn label(&self) -> String {
            self.0.to_string()
        }

        async fn send(&self, _payload: &Bytes) -> Result<()> {
            Ok(())
        }
    }

    fn stuck_peer() -> SfuPeer {
        SfuPeer::new(PeerId::from("alice"), "s1", Arc::new(StuckConnection))
    }

    #[test]
    fn test_closed_signal_fires_once() {
        let peer = stuck_peer();
        let token = peer.closed_token();
        assert!(!peer.is_closed());

        assert!(peer.signal_closed());
        assert!(!peer.signal_closed());
        assert!(token.is_cancelled());
        assert!(peer.is_closed());
    }

    #[test]
    fn test_latest_data_channel_wins() {
        let peer = stuck_peer();
        assert!(peer.data_channel().is_none());

        peer.set_data_channel(Arc::new(Channel("first")));
        peer.set_data_channel(Arc::new(Channel("game-sync")));

        let channel = peer.data_channel().expect("channel should be set");
        assert_eq!(channel.label(), "game-sync");
        assert!(peer.get_stats().has_data_channel);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_connection_is_bounded() {
        let peer = stuck_peer();
        peer.close_connection(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_stats() {
        let peer = stuck_peer();
        peer.record_message_received();
        peer.record_message_received();
        peer.record_send_failure();
        peer.record_track_published();

        let stats = peer.get_stats();
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.send_failures, 1);
        assert_eq!(stats.tracks_published, 1);
        assert_eq!(stats.tracks_subscribed, 0);
    }
}
