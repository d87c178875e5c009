//! Connection event handler for one peer session
//!
//! Routes transport events back into the room: inbound tracks are fanned out,
//! data channel messages are relayed, and a terminal connection state removes
//! the session from its room.

use crate::registry::SfuRegistry;
use crate::room::SfuRoom;
use crate::transport::{ConnectionHandler, ConnectionState, DataSink, InboundTrack};
use crate::types::{PeerId, RoomId};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, info};

pub(crate) struct PeerEvents {
    registry: Weak<SfuRegistry>,
    /// Set once the peer has been registered in its room
    room: OnceLock<Weak<SfuRoom>>,
    room_id: RoomId,
    peer_id: PeerId,
    session: String,
}

impl PeerEvents {
    pub(crate) fn new(
        registry: Weak<SfuRegistry>,
        room_id: RoomId,
        peer_id: PeerId,
        session: String,
    ) -> Self {
        Self {
            registry,
            room: OnceLock::new(),
            room_id,
            peer_id,
            session,
        }
    }

    pub(crate) fn bind(&self, room: &Arc<SfuRoom>) {
        let _ = self.room.set(Arc::downgrade(room));
    }

    /// The room, if this session is still the peer registered under its id
    fn current_room(&self) -> Option<Arc<SfuRoom>> {
        let room = self.room.get()?.upgrade()?;
        let peer = room.peer(&self.peer_id)?;
        (peer.session() == self.session).then_some(room)
    }
}

#[async_trait]
impl ConnectionHandler for PeerEvents {
    async fn on_track(&self, track: Arc<dyn InboundTrack>) {
        info!(
            room_id = %self.room_id,
            peer_id = %self.peer_id,
            track_id = %track.id(),
            kind = ?track.kind(),
            "Inbound track"
        );
        match self.current_room() {
            Some(room) => {
                room.forward_track(&self.peer_id, track).await;
            }
            None => debug!(
                room_id = %self.room_id,
                peer_id = %self.peer_id,
                "Track arrived for an inactive session, ignoring"
            ),
        }
    }

    async fn on_data_channel(&self, channel: Arc<dyn DataSink>) {
        let Some(peer) = self
            .current_room()
            .and_then(|room| room.peer(&self.peer_id))
        else {
            return;
        };
        info!(
            room_id = %self.room_id,
            peer_id = %self.peer_id,
            label = %channel.label(),
            "Data channel opened"
        );
        peer.set_data_channel(channel);
    }

    async fn on_data_message(&self, payload: Bytes) {
        if let Some(room) = self.current_room() {
            room.broadcast_data(&self.peer_id, payload).await;
        }
    }

    async fn on_state_change(&self, state: ConnectionState) {
        info!(
            room_id = %self.room_id,
            peer_id = %self.peer_id,
            state = ?state,
            "Peer connection state changed"
        );
        if !state.is_terminal() {
            return;
        }

        // Closing happens off the transport's callback path.
        let registry = self.registry.clone();
        let room = self.room.get().cloned();
        let room_id = self.room_id.clone();
        let peer_id = self.peer_id.clone();
        let session = self.session.clone();
        tokio::spawn(async move {
            if let Some(registry) = registry.upgrade() {
                registry.leave(&room_id, &peer_id, Some(&session)).await;
            } else if let Some(room) = room.and_then(|r| r.upgrade()) {
                room.remove_peer_session(&peer_id, &session).await;
            }
        });
    }

    async fn on_ice_candidate(&self, candidate: Option<String>) {
        match candidate {
            Some(candidate) => debug!(
                room_id = %self.room_id,
                peer_id = %self.peer_id,
                candidate = %candidate,
                "Local ICE candidate"
            ),
            None => debug!(
                room_id = %self.room_id,
                peer_id = %self.peer_id,
                "ICE gathering complete"
            ),
        }
    }
}
