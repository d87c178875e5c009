//! Offer/answer negotiation for one join request
//!
//! A join walks through: connection created, peer registered, remote
//! description set, answer created, local description set, answer returned.
//! A failure at any step removes the peer from its room and closes its
//! connection before the error is returned.

use crate::error::SfuError;
use crate::events::PeerEvents;
use crate::peer::SfuPeer;
use crate::registry::SfuRegistry;
use crate::transport::{ConnectionFactory, SdpKind, SessionDescription};
use crate::types::{PeerId, RoomId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Why a join was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinErrorKind {
    MissingParameters,
    InvalidOffer,
    #[serde(rename = "connection-create-failure")]
    ConnectionCreate,
    #[serde(rename = "negotiation-failure")]
    Negotiation,
}

impl JoinErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingParameters => "missing-parameters",
            Self::InvalidOffer => "invalid-offer",
            Self::ConnectionCreate => "connection-create-failure",
            Self::Negotiation => "negotiation-failure",
        }
    }

    /// The request itself was at fault
    #[must_use]
    pub const fn is_client_error(self) -> bool {
        matches!(self, Self::MissingParameters | Self::InvalidOffer)
    }
}

impl fmt::Display for JoinErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The negotiation step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    CreateConnection,
    JoinRoom,
    SetRemoteDescription,
    CreateAnswer,
    SetLocalDescription,
    LocalDescription,
}

impl fmt::Display for NegotiationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CreateConnection => "create connection",
            Self::JoinRoom => "join room",
            Self::SetRemoteDescription => "set remote description",
            Self::CreateAnswer => "create answer",
            Self::SetLocalDescription => "set local description",
            Self::LocalDescription => "read local description",
        })
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct JoinError {
    pub kind: JoinErrorKind,
    pub step: Option<NegotiationStep>,
    pub message: String,
}

impl JoinError {
    pub fn new(kind: JoinErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            step: None,
            message: message.into(),
        }
    }

    fn at(kind: JoinErrorKind, step: NegotiationStep, err: impl fmt::Display) -> Self {
        Self {
            kind,
            step: Some(step),
            message: format!("{step} failed: {err}"),
        }
    }
}

/// A join request as received from a client
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub room_id: String,
    pub peer_id: String,
    pub offer: SessionDescription,
}

/// Terminates offer/answer exchanges and registers the resulting peers
pub struct Negotiator {
    registry: Arc<SfuRegistry>,
    factory: Arc<dyn ConnectionFactory>,
}

impl Negotiator {
    pub fn new(registry: Arc<SfuRegistry>, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self { registry, factory }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SfuRegistry> {
        &self.registry
    }

    /// Run one join to completion and return the answer for the client.
    pub async fn join(&self, request: JoinRequest) -> Result<SessionDescription, JoinError> {
        let room_id = RoomId::new(request.room_id);
        let peer_id = PeerId::new(request.peer_id);
        if room_id.is_blank() || peer_id.is_blank() {
            return Err(JoinError::new(
                JoinErrorKind::MissingParameters,
                "room and peer are required",
            ));
        }

        let offer = request.offer;
        if offer.kind != SdpKind::Offer {
            return Err(JoinError::new(
                JoinErrorKind::InvalidOffer,
                format!("expected an offer, got {:?}", offer.kind),
            ));
        }
        if offer.sdp.trim().is_empty() {
            return Err(JoinError::new(JoinErrorKind::InvalidOffer, "offer has no sdp"));
        }

        let session = nanoid::nanoid!();
        let events = Arc::new(PeerEvents::new(
            Arc::downgrade(&self.registry),
            room_id.clone(),
            peer_id.clone(),
            session.clone(),
        ));

        let connection = self
            .factory
            .create(events.clone())
            .await
            .map_err(|e| {
                warn!(room_id = %room_id, peer_id = %peer_id, error = %e, "Failed to create peer connection");
                JoinError::at(JoinErrorKind::ConnectionCreate, NegotiationStep::CreateConnection, e)
            })?;

        let peer = Arc::new(SfuPeer::new(peer_id.clone(), session.clone(), connection));
        let room = match self.registry.join_room(&room_id, Arc::clone(&peer)).await {
            Ok(room) => room,
            Err(e) => {
                peer.close_connection(self.registry.config().close_timeout()).await;
                return Err(JoinError::at(
                    JoinErrorKind::Negotiation,
                    NegotiationStep::JoinRoom,
                    e,
                ));
            }
        };
        events.bind(&room);

        match negotiate(&peer, offer).await {
            Ok(answer) => {
                info!(room_id = %room_id, peer_id = %peer_id, session = %session, "Negotiation complete");
                Ok(answer)
            }
            Err(e) => {
                warn!(
                    room_id = %room_id,
                    peer_id = %peer_id,
                    step = ?e.step,
                    error = %e,
                    "Negotiation failed"
                );
                self.registry.leave(&room_id, &peer_id, Some(&session)).await;
                Err(e)
            }
        }
    }
}

async fn negotiate(peer: &SfuPeer, offer: SessionDescription) -> Result<SessionDescription, JoinError> {
    let connection = peer.connection();

    connection
        .set_remote_description(offer)
        .await
        .map_err(|e| {
            let kind = match e {
                SfuError::InvalidSdp(_) => JoinErrorKind::InvalidOffer,
                _ => JoinErrorKind::Negotiation,
            };
            JoinError::at(kind, NegotiationStep::SetRemoteDescription, e)
        })?;

    let answer = connection.create_answer().await.map_err(|e| {
        JoinError::at(JoinErrorKind::Negotiation, NegotiationStep::CreateAnswer, e)
    })?;

    connection.set_local_description(answer).await.map_err(|e| {
        JoinError::at(JoinErrorKind::Negotiation, NegotiationStep::SetLocalDescription, e)
    })?;

    connection.local_description().await.ok_or_else(|| {
        JoinError::at(
            JoinErrorKind::Negotiation,
            NegotiationStep::LocalDescription,
            "no local description after negotiation",
        )
    })
}
