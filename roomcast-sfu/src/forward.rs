//! Track forwarding
//!
//! One inbound track fans out to every destination that was in the room when
//! the track arrived:
//!
//! - a reader task pulls RTP packets off the inbound track and publishes them
//!   on a small broadcast queue,
//! - one forwarder task per destination writes each packet verbatim to that
//!   destination's outbound track,
//! - one feedback task per destination drains RTCP for the outbound sender.
//!
//! Delivery is lossy. A destination that falls behind skips packets, and a
//! failed write only stops forwarding to that destination.

use crate::transport::{FeedbackSource, InboundTrack, OutboundStream, PacketSink, RtpPacket};
use crate::types::{PeerId, RoomId, TrackId};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A destination peer together with the outbound stream attached for it
pub struct ForwardTarget {
    pub peer_id: PeerId,
    pub closed: CancellationToken,
    pub outbound: OutboundStream,
}

/// Handles of the tasks started for one inbound track
pub struct TrackFanout {
    pub track_id: TrackId,
    pub reader: JoinHandle<()>,
    pub forwarders: Vec<(PeerId, JoinHandle<()>)>,
}

impl TrackFanout {
    /// Number of destinations the track is being forwarded to
    #[must_use]
    pub fn destinations(&self) -> usize {
        self.forwarders.len()
    }

    /// True once the forwarder for `peer_id` has stopped.
    #[must_use]
    pub fn is_forwarder_finished(&self, peer_id: &PeerId) -> Option<bool> {
        self.forwarders
            .iter()
            .find(|(id, _)| id == peer_id)
            .map(|(_, handle)| handle.is_finished())
    }
}

#[derive(Clone)]
struct Labels {
    room_id: RoomId,
    source_id: PeerId,
    track_id: TrackId,
}

/// Start the reader, forwarder and feedback tasks for one inbound track.
///
/// Every target subscribes before the reader starts, so no destination misses
/// the first packets.
pub fn spawn_fanout(
    room_id: RoomId,
    source_id: PeerId,
    inbound: Arc<dyn InboundTrack>,
    source_closed: CancellationToken,
    targets: Vec<ForwardTarget>,
    queue_packets: usize,
) -> TrackFanout {
    let labels = Labels {
        room_id,
        source_id,
        track_id: TrackId::from(inbound.id()),
    };
    let (tx, _) = broadcast::channel(queue_packets.max(1));

    let forwarders = targets
        .into_iter()
        .map(|target| {
            let rx = tx.subscribe();
            tokio::spawn(drain_feedback(
                labels.clone(),
                target.peer_id.clone(),
                Arc::clone(&target.outbound.feedback),
                target.closed.clone(),
            ));
            let handle = tokio::spawn(forward_loop(
                labels.clone(),
                target.peer_id.clone(),
                rx,
                Arc::clone(&target.outbound.sink),
                target.closed,
            ));
            (target.peer_id, handle)
        })
        .collect::<Vec<_>>();

    info!(
        room_id = %labels.room_id,
        peer_id = %labels.source_id,
        track_id = %labels.track_id,
        destinations = forwarders.len(),
        "Forwarding track"
    );

    let track_id = labels.track_id.clone();
    let reader = tokio::spawn(read_loop(labels, inbound, tx, source_closed));

    TrackFanout {
        track_id,
        reader,
        forwarders,
    }
}

async fn read_loop(
    labels: Labels,
    inbound: Arc<dyn InboundTrack>,
    tx: broadcast::Sender<RtpPacket>,
    source_closed: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            () = source_closed.cancelled() => {
                debug!(track_id = %labels.track_id, "Source peer closed, stopping reader");
                break;
            }
            next = inbound.read_packet() => next,
        };

        match next {
            // No subscribers left is not an error, the packet is just dropped.
            Ok(Some(packet)) => {
                let _ = tx.send(packet);
            }
            Ok(None) => {
                debug!(
                    room_id = %labels.room_id,
                    track_id = %labels.track_id,
                    "Inbound track ended"
                );
                break;
            }
            Err(e) => {
                warn!(
                    room_id = %labels.room_id,
                    peer_id = %labels.source_id,
                    track_id = %labels.track_id,
                    error = %e,
                    "Failed to read from inbound track"
                );
                break;
            }
        }
    }
}

async fn forward_loop(
    labels: Labels,
    destination: PeerId,
    mut rx: broadcast::Receiver<RtpPacket>,
    sink: Arc<dyn PacketSink>,
    destination_closed: CancellationToken,
) {
    loop {
        let packet = tokio::select! {
            () = destination_closed.cancelled() => break,
            received = rx.recv() => match received {
                Ok(packet) => packet,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(
                        track_id = %labels.track_id,
                        peer_id = %destination,
                        skipped,
                        "Destination lagging, packets skipped"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if let Err(e) = sink.write_packet(&packet).await {
            warn!(
                room_id = %labels.room_id,
                track_id = %labels.track_id,
                peer_id = %destination,
                error = %e,
                "Forward write failed"
            );
            break;
        }
    }

    debug!(
        room_id = %labels.room_id,
        track_id = %labels.track_id,
        peer_id = %destination,
        "Stopped forwarding"
    );
}

async fn drain_feedback(
    labels: Labels,
    destination: PeerId,
    feedback: Arc<dyn FeedbackSource>,
    destination_closed: CancellationToken,
) {
    loop {
        tokio::select! {
            () = destination_closed.cancelled() => break,
            read = feedback.read_feedback() => {
                if read.is_err() {
                    break;
                }
            }
        }
    }

    debug!(
        track_id = %labels.track_id,
        peer_id = %destination,
        "Feedback stream closed"
    );
}
