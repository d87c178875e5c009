//! SFU Registry - owner of every live room
//!
//! This module provides:
//! - Lazy, race-free room creation
//! - Joining and leaving with empty-room reaping
//! - Bounded teardown of one room or all of them
//! - Aggregate statistics

use crate::config::SfuConfig;
use crate::error::{Result, SfuError};
use crate::peer::SfuPeer;
use crate::room::SfuRoom;
use crate::types::{PeerId, RoomId};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Global registry statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryStats {
    /// Number of live rooms
    pub active_rooms: usize,
    /// Total number of peers across all rooms
    pub total_peers: usize,
    /// Rooms created since startup
    pub rooms_created: u64,
    /// Inbound tracks fanned out in live rooms
    pub tracks_forwarded: u64,
    /// Data channel messages relayed in live rooms
    pub messages_relayed: u64,
}

/// SFU Registry - maps room ids to rooms
pub struct SfuRegistry {
    config: Arc<SfuConfig>,

    rooms: DashMap<RoomId, Arc<SfuRoom>>,

    rooms_created: AtomicU64,
}

impl SfuRegistry {
    /// Create a new registry
    pub fn new(config: SfuConfig) -> Arc<Self> {
        info!(
            ice_servers = config.ice_servers.len(),
            reap_empty_rooms = config.reap_empty_rooms,
            forward_queue_packets = config.forward_queue_packets,
            "SFU registry initialized"
        );

        Arc::new(Self {
            config: Arc::new(config),
            rooms: DashMap::new(),
            rooms_created: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Arc<SfuConfig> {
        &self.config
    }

    /// Get a room, creating it on first use.
    ///
    /// Concurrent calls with the same id observe the same instance.
    pub fn get_or_create_room(&self, room_id: &RoomId) -> Arc<SfuRoom> {
        let mut created = false;
        let room = Arc::clone(
            self.rooms
                .entry(room_id.clone())
                .or_insert_with(|| {
                    created = true;
                    Arc::new(SfuRoom::new(room_id.clone(), Arc::clone(&self.config)))
                })
                .value(),
        );

        if created {
            self.rooms_created.fetch_add(1, Ordering::Relaxed);
            info!(room_id = %room_id, total_rooms = self.rooms.len(), "Created new room");
        }
        room
    }

    /// Add a peer to a room, creating the room if needed.
    ///
    /// If the room was closed between lookup and insertion, a fresh room takes
    /// its place and the join is retried there.
    pub async fn join_room(&self, room_id: &RoomId, peer: Arc<SfuPeer>) -> Result<Arc<SfuRoom>> {
        loop {
            let room = self.get_or_create_room(room_id);
            match room.add_peer(Arc::clone(&peer)).await {
                Ok(_) => return Ok(room),
                Err(SfuError::RoomClosed(_)) => {
                    debug!(room_id = %room_id, "Room closed during join, retrying");
                    self.rooms.remove_if(room_id, |_, r| Arc::ptr_eq(r, &room));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Remove a peer from a room and close its connection.
    ///
    /// With `session` set, only that session of the peer is removed. Reaps the
    /// room when it becomes empty and reaping is enabled.
    pub async fn leave(&self, room_id: &RoomId, peer_id: &PeerId, session: Option<&str>) -> bool {
        let Some(room) = self.room(room_id) else {
            debug!(room_id = %room_id, peer_id = %peer_id, "Room not found when removing peer");
            return false;
        };

        let Some(peer) = room.detach_peer(peer_id, session) else {
            return false;
        };

        if self.config.reap_empty_rooms
            && self
                .rooms
                .remove_if(room_id, |_, r| Arc::ptr_eq(r, &room) && r.close_if_empty())
                .is_some()
        {
            info!(room_id = %room_id, remaining_rooms = self.rooms.len(), "Reaped empty room");
        }

        peer.close_connection(self.config.close_timeout()).await;
        true
    }

    #[must_use]
    pub fn room(&self, room_id: &RoomId) -> Option<Arc<SfuRoom>> {
        self.rooms.get(room_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove one room and close all its peers. Returns whether it existed.
    pub async fn close_room(&self, room_id: &RoomId) -> bool {
        match self.rooms.remove(room_id) {
            Some((_, room)) => {
                room.close().await;
                true
            }
            None => false,
        }
    }

    /// Remove every room and close every peer. Returns the number of rooms closed.
    ///
    /// Each connection close is bounded by the configured timeout, so one stuck
    /// connection cannot hold up the rest.
    pub async fn close_all(&self) -> usize {
        let rooms: Vec<Arc<SfuRoom>> = self
            .room_ids()
            .iter()
            .filter_map(|id| self.rooms.remove(id).map(|(_, room)| room))
            .collect();

        let peers: usize = join_all(rooms.iter().map(|room| room.close()))
            .await
            .into_iter()
            .sum();

        info!(rooms = rooms.len(), peers, "Closed all rooms");
        rooms.len()
    }

    /// Get list of all active room IDs
    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Get number of active rooms
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Aggregate statistics over the live rooms
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            rooms_created: self.rooms_created.load(Ordering::Relaxed),
            ..Default::default()
        };

        let rooms: Vec<Arc<SfuRoom>> = self.rooms.iter().map(|e| Arc::clone(e.value())).collect();
        for room in rooms {
            let room_stats = room.get_stats();
            stats.active_rooms += 1;
            stats.total_peers += room_stats.peer_count;
            stats.tracks_forwarded += room_stats.tracks_forwarded;
            stats.messages_relayed += room_stats.messages_relayed;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<SfuRegistry> {
        SfuRegistry::new(SfuConfig::default())
    }

    #[tokio::test]
    async fn test_registry_creation() {
        let registry = registry();
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.stats().rooms_created, 0);
    }

    #[tokio::test]
    async fn test_room_lifecycle() {
        let registry = registry();

        let room_id = RoomId::from("test-room");
        let room = registry.get_or_create_room(&room_id);
        assert_eq!(registry.room_count(), 1);

        // Getting the same room should return the existing one
        let room2 = registry.get_or_create_room(&room_id);
        assert_eq!(registry.room_count(), 1);
        assert!(Arc::ptr_eq(&room, &room2));

        assert!(registry.close_room(&room_id).await);
        assert!(room.is_closed());
        assert!(!registry.close_room(&room_id).await);
        assert_eq!(registry.room_count(), 0);
    }

    #[tokio::test]
    async fn test_leave_unknown_room() {
        let registry = registry();
        let left = registry
            .leave(&RoomId::from("nowhere"), &PeerId::from("ghost"), None)
            .await;
        assert!(!left);
    }

    #[tokio::test]
    async fn test_close_all_twice() {
        let registry = registry();
        registry.get_or_create_room(&RoomId::from("a"));
        registry.get_or_create_room(&RoomId::from("b"));

        assert_eq!(registry.close_all().await, 2);
        assert_eq!(registry.close_all().await, 0);
        assert_eq!(registry.room_count(), 0);
    }
}
