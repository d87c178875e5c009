//! SFU Room management
//!
//! A room owns its peer map behind a synchronous lock. Every operation that
//! talks to a connection first copies what it needs out of the map and then
//! awaits with the lock released.

use crate::config::SfuConfig;
use crate::error::{Result, SfuError};
use crate::forward::{spawn_fanout, ForwardTarget, TrackFanout};
use crate::peer::{PeerStats, SfuPeer};
use crate::transport::{InboundTrack, OutboundTrackSpec};
use crate::types::{PeerId, RoomId};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct RoomState {
    peers: HashMap<PeerId, Arc<SfuPeer>>,
    /// Set once the room is closed; a closed room accepts no new peers
    closed: bool,
}

pub struct SfuRoom {
    pub id: RoomId,
    state: RwLock<RoomState>,
    config: Arc<SfuConfig>,
    created_at: DateTime<Utc>,
    total_peers_joined: AtomicU64,
    tracks_forwarded: AtomicU64,
    messages_relayed: AtomicU64,
}

impl SfuRoom {
    pub fn new(id: RoomId, config: Arc<SfuConfig>) -> Self {
        Self {
            id,
            state: RwLock::new(RoomState::default()),
            config,
            created_at: Utc::now(),
            total_peers_joined: AtomicU64::new(0),
            tracks_forwarded: AtomicU64::new(0),
            messages_relayed: AtomicU64::new(0),
        }
    }

    /// Register a peer under its id and return the new member count.
    ///
    /// A peer already registered under the same id is displaced: it is removed
    /// and its closed signal fired in the same critical section, then its
    /// connection is closed.
    pub async fn add_peer(&self, peer: Arc<SfuPeer>) -> Result<usize> {
        let (count, displaced) = {
            let mut state = self.state.write();
            if state.closed {
                return Err(SfuError::RoomClosed(self.id.clone()));
            }
            let displaced = state
                .peers
                .insert(peer.id.clone(), Arc::clone(&peer))
                .filter(|old| !Arc::ptr_eq(old, &peer));
            if let Some(old) = &displaced {
                old.signal_closed();
            }
            (state.peers.len(), displaced)
        };

        self.total_peers_joined.fetch_add(1, Ordering::Relaxed);
        info!(
            room_id = %self.id,
            peer_id = %peer.id,
            peer_count = count,
            "Peer joined room"
        );

        if let Some(old) = displaced {
            warn!(
                room_id = %self.id,
                peer_id = %old.id,
                session = %old.session(),
                "Peer id rejoined, closing previous connection"
            );
            old.close_connection(self.config.close_timeout()).await;
        }

        Ok(count)
    }

    /// Remove a peer from the map and fire its closed signal, without closing
    /// its connection. With `session` set, only that session is removed.
    pub(crate) fn detach_peer(&self, peer_id: &PeerId, session: Option<&str>) -> Option<Arc<SfuPeer>> {
        let (peer, remaining) = {
            let mut state = self.state.write();
            let matches = state
                .peers
                .get(peer_id)
                .is_some_and(|p| session.map_or(true, |s| p.session() == s));
            if !matches {
                return None;
            }
            let peer = state.peers.remove(peer_id)?;
            peer.signal_closed();
            (peer, state.peers.len())
        };

        info!(
            room_id = %self.id,
            peer_id = %peer_id,
            peer_count = remaining,
            "Peer left room"
        );
        Some(peer)
    }

    /// Remove a peer and close its connection. Removing an absent peer is a no-op.
    pub async fn remove_peer(&self, peer_id: &PeerId) -> bool {
        self.take_and_close(peer_id, None).await
    }

    /// Like [`Self::remove_peer`], but only if `session` is still the registered one.
    pub async fn remove_peer_session(&self, peer_id: &PeerId, session: &str) -> bool {
        self.take_and_close(peer_id, Some(session)).await
    }

    async fn take_and_close(&self, peer_id: &PeerId, session: Option<&str>) -> bool {
        match self.detach_peer(peer_id, session) {
            Some(peer) => {
                peer.close_connection(self.config.close_timeout()).await;
                true
            }
            None => false,
        }
    }

    /// Mark the room closed if it has no peers. Returns whether it is closed.
    pub(crate) fn close_if_empty(&self) -> bool {
        let mut state = self.state.write();
        if state.peers.is_empty() {
            state.closed = true;
        }
        state.closed
    }

    /// Close the room: reject further joins, then remove and close every peer.
    /// Returns the number of peers that were closed.
    pub async fn close(&self) -> usize {
        let peers: Vec<Arc<SfuPeer>> = {
            let mut state = self.state.write();
            state.closed = true;
            state.peers.drain().map(|(_, peer)| peer).collect()
        };
        for peer in &peers {
            peer.signal_closed();
        }

        let timeout = self.config.close_timeout();
        join_all(peers.iter().map(|peer| peer.close_connection(timeout))).await;

        info!(room_id = %self.id, peers_closed = peers.len(), "Room closed");
        peers.len()
    }

    #[must_use]
    pub fn peer(&self, peer_id: &PeerId) -> Option<Arc<SfuPeer>> {
        self.state.read().peers.get(peer_id).cloned()
    }

    #[must_use]
    pub fn peers(&self) -> Vec<Arc<SfuPeer>> {
        self.state.read().peers.values().cloned().collect()
    }

    #[must_use]
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.state.read().peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.state.read().peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().peers.is_empty()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Snapshot of every peer except `sender_id`
    fn others(&self, sender_id: &PeerId) -> Vec<Arc<SfuPeer>> {
        self.state
            .read()
            .peers
            .iter()
            .filter(|(id, _)| *id != sender_id)
            .map(|(_, peer)| Arc::clone(peer))
            .collect()
    }

    /// Send `payload` to the data channel of every other peer.
    ///
    /// Sends run concurrently outside the lock. Peers without a data channel are
    /// skipped and failed sends are logged, never retried. Returns the number of
    /// peers the payload was delivered to.
    pub async fn broadcast_data(&self, sender_id: &PeerId, payload: Bytes) -> usize {
        let targets: Vec<_> = self
            .others(sender_id)
            .into_iter()
            .filter_map(|peer| peer.data_channel().map(|channel| (peer, channel)))
            .collect();

        let results = join_all(
            targets
                .iter()
                .map(|(_, channel)| channel.send(&payload)),
        )
        .await;

        let mut delivered = 0;
        for ((peer, _), result) in targets.iter().zip(results) {
            match result {
                Ok(()) => {
                    peer.record_message_received();
                    delivered += 1;
                }
                Err(e) => {
                    peer.record_send_failure();
                    debug!(
                        room_id = %self.id,
                        from = %sender_id,
                        peer_id = %peer.id,
                        error = %e,
                        "Data relay send failed"
                    );
                }
            }
        }

        self.messages_relayed.fetch_add(1, Ordering::Relaxed);
        delivered
    }

    /// Fan an inbound track of `sender_id` out to every other peer present now.
    ///
    /// Each destination gets its own outbound track, labelled with the sender's
    /// id as stream id. A destination whose track cannot be attached is
    /// skipped. Returns `None` if the sender is no longer in the room.
    pub async fn forward_track(
        &self,
        sender_id: &PeerId,
        inbound: Arc<dyn InboundTrack>,
    ) -> Option<TrackFanout> {
        let Some(source) = self.peer(sender_id) else {
            debug!(
                room_id = %self.id,
                peer_id = %sender_id,
                track_id = %inbound.id(),
                "Track from a peer no longer in the room, ignoring"
            );
            return None;
        };

        let spec = OutboundTrackSpec {
            codec: inbound.codec(),
            track_id: inbound.id(),
            stream_id: sender_id.to_string(),
        };
        let destinations = self.others(sender_id);

        let attached = join_all(
            destinations
                .iter()
                .map(|peer| peer.connection().add_outbound_track(&spec)),
        )
        .await;

        let mut targets = Vec::with_capacity(destinations.len());
        for (peer, result) in destinations.into_iter().zip(attached) {
            match result {
                Ok(outbound) => {
                    peer.record_track_subscribed();
                    targets.push(ForwardTarget {
                        peer_id: peer.id.clone(),
                        closed: peer.closed_token(),
                        outbound,
                    });
                }
                Err(e) => warn!(
                    room_id = %self.id,
                    peer_id = %peer.id,
                    track_id = %spec.track_id,
                    error = %e,
                    "Failed to attach outbound track, skipping destination"
                ),
            }
        }

        source.record_track_published();
        self.tracks_forwarded.fetch_add(1, Ordering::Relaxed);

        Some(spawn_fanout(
            self.id.clone(),
            sender_id.clone(),
            inbound,
            source.closed_token(),
            targets,
            self.config.forward_queue_packets,
        ))
    }

    /// Get room statistics
    #[must_use]
    pub fn get_stats(&self) -> RoomStats {
        let mut peers: Vec<PeerStats> = self.peers().iter().map(|p| p.get_stats()).collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));

        RoomStats {
            room_id: self.id.clone(),
            created_at: self.created_at,
            peer_count: peers.len(),
            total_peers_joined: self.total_peers_joined.load(Ordering::Relaxed),
            tracks_forwarded: self.tracks_forwarded.load(Ordering::Relaxed),
            messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            peers,
        }
    }
}

/// Room statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomStats {
    pub room_id: RoomId,
    pub created_at: DateTime<Utc>,
    pub peer_count: usize,
    pub total_peers_joined: u64,
    /// Inbound tracks fanned out in this room
    pub tracks_forwarded: u64,
    /// Data channel messages relayed in this room
    pub messages_relayed: u64,
    pub peers: Vec<PeerStats>,
}
