//! In-memory transport used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use roomcast_sfu::transport::{
    ConnectionFactory, ConnectionHandler, DataSink, FeedbackSource, InboundTrack,
    MediaConnection, OutboundStream, OutboundTrackSpec, PacketSink, RtpPacket, TrackCodec,
    TrackKind,
};
use roomcast_sfu::{
    JoinRequest, Negotiator, Result, SessionDescription, SfuConfig, SfuError, SfuRegistry,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// Failure knobs applied to connections created by [`FakeFactory`]
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub reject_offer: bool,
    pub fail_answer: bool,
    pub fail_outbound: bool,
    pub hang_on_close: bool,
}

pub struct FakeConnection {
    handler: Option<Arc<dyn ConnectionHandler>>,
    behavior: Behavior,
    remote: Mutex<Option<SessionDescription>>,
    local: Mutex<Option<SessionDescription>>,
    outbound: Mutex<Vec<(OutboundTrackSpec, Arc<FakeSink>)>>,
    closed: AtomicBool,
}

impl FakeConnection {
    pub fn new(handler: Option<Arc<dyn ConnectionHandler>>, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            handler,
            behavior,
            remote: Mutex::new(None),
            local: Mutex::new(None),
            outbound: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn handler(&self) -> Arc<dyn ConnectionHandler> {
        Arc::clone(self.handler.as_ref().expect("connection was created without a handler"))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn outbound(&self) -> Vec<(OutboundTrackSpec, Arc<FakeSink>)> {
        self.outbound.lock().clone()
    }

    /// Sink of the only outbound track attached to this connection
    pub fn sink(&self) -> Arc<FakeSink> {
        let outbound = self.outbound.lock();
        assert_eq!(outbound.len(), 1, "expected exactly one outbound track");
        Arc::clone(&outbound[0].1)
    }
}

#[async_trait]
impl MediaConnection for FakeConnection {
    async fn set_remote_description(&self, offer: SessionDescription) -> Result<()> {
        if self.behavior.reject_offer {
            return Err(SfuError::InvalidSdp("unparseable offer".to_string()));
        }
        *self.remote.lock() = Some(offer);
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.behavior.fail_answer {
            return Err(SfuError::Transport("no codecs in common".to_string()));
        }
        let remote = self.remote.lock().clone().map(|d| d.sdp).unwrap_or_default();
        Ok(SessionDescription::answer(format!("answer-to:{remote}")))
    }

    async fn set_local_description(&self, answer: SessionDescription) -> Result<()> {
        *self.local.lock() = Some(answer);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn add_outbound_track(&self, spec: &OutboundTrackSpec) -> Result<OutboundStream> {
        if self.is_closed() {
            return Err(SfuError::ConnectionClosed);
        }
        if self.behavior.fail_outbound {
            return Err(SfuError::Transport("no transceiver available".to_string()));
        }
        let sink = Arc::new(FakeSink::default());
        self.outbound.lock().push((spec.clone(), Arc::clone(&sink)));
        Ok(OutboundStream {
            sink,
            feedback: Arc::new(FakeFeedback),
        })
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.behavior.hang_on_close {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Records the sequence numbers written to it
#[derive(Default)]
pub struct FakeSink {
    written: Mutex<Vec<u16>>,
    fail: AtomicBool,
}

impl FakeSink {
    pub fn written(&self) -> Vec<u16> {
        self.written.lock().clone()
    }

    pub fn fail_writes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PacketSink for FakeSink {
    async fn write_packet(&self, packet: &RtpPacket) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SfuError::Transport("write failed".to_string()));
        }
        self.written.lock().push(packet.header.sequence_number);
        Ok(())
    }
}

/// Feedback stream that never delivers anything
pub struct FakeFeedback;

#[async_trait]
impl FeedbackSource for FakeFeedback {
    async fn read_feedback(&self) -> Result<usize> {
        std::future::pending().await
    }
}

/// Feedback stream whose sender has already gone away
pub struct ClosedFeedback;

#[async_trait]
impl FeedbackSource for ClosedFeedback {
    async fn read_feedback(&self) -> Result<usize> {
        Err(SfuError::ConnectionClosed)
    }
}

/// Sink whose writes wait until [`GatedSink::open`] is called
pub struct GatedSink {
    gate: Semaphore,
    written: Mutex<Vec<u16>>,
}

impl GatedSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            written: Mutex::new(Vec::new()),
        })
    }

    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub fn written(&self) -> Vec<u16> {
        self.written.lock().clone()
    }
}

#[async_trait]
impl PacketSink for GatedSink {
    async fn write_packet(&self, packet: &RtpPacket) -> Result<()> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| SfuError::ConnectionClosed)?;
        permit.forget();
        self.written.lock().push(packet.header.sequence_number);
        Ok(())
    }
}

/// Inbound track that replays a fixed list of reads, then stalls
pub struct ScriptedTrack {
    id: String,
    reads: Mutex<VecDeque<Result<Option<RtpPacket>>>>,
}

impl ScriptedTrack {
    pub fn new(id: &str, reads: Vec<Result<Option<RtpPacket>>>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            reads: Mutex::new(reads.into()),
        })
    }
}

#[async_trait]
impl InboundTrack for ScriptedTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn codec(&self) -> TrackCodec {
        TrackCodec {
            mime_type: "video/VP8".to_string(),
            clock_rate: 90000,
            ..Default::default()
        }
    }

    async fn read_packet(&self) -> Result<Option<RtpPacket>> {
        let next = self.reads.lock().pop_front();
        match next {
            Some(read) => read,
            None => std::future::pending().await,
        }
    }
}

pub struct FakeInboundTrack {
    id: String,
    kind: TrackKind,
    packets: tokio::sync::Mutex<mpsc::UnboundedReceiver<RtpPacket>>,
}

impl FakeInboundTrack {
    /// A track and the sender feeding it. Dropping the sender ends the stream.
    pub fn new(id: &str, kind: TrackKind) -> (Arc<Self>, mpsc::UnboundedSender<RtpPacket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let track = Arc::new(Self {
            id: id.to_string(),
            kind,
            packets: tokio::sync::Mutex::new(rx),
        });
        (track, tx)
    }
}

#[async_trait]
impl InboundTrack for FakeInboundTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn codec(&self) -> TrackCodec {
        match self.kind {
            TrackKind::Video => TrackCodec {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
            TrackKind::Audio => TrackCodec {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
            },
        }
    }

    async fn read_packet(&self) -> Result<Option<RtpPacket>> {
        Ok(self.packets.lock().await.recv().await)
    }
}

pub struct FakeDataChannel {
    label: String,
    sent: Mutex<Vec<Bytes>>,
    fail: AtomicBool,
}

impl FakeDataChannel {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn failing(label: &str) -> Arc<Self> {
        let channel = Self::new(label);
        channel.fail.store(true, Ordering::SeqCst);
        channel
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl DataSink for FakeDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn send(&self, payload: &Bytes) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SfuError::Transport("data channel closed".to_string()));
        }
        self.sent.lock().push(payload.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFactory {
    behavior: Mutex<Behavior>,
    fail_create: AtomicBool,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeFactory {
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    /// Number of connections created so far
    pub fn created(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn last(&self) -> Arc<FakeConnection> {
        Arc::clone(self.connections.lock().last().expect("no connection created"))
    }
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    async fn create(&self, handler: Arc<dyn ConnectionHandler>) -> Result<Arc<dyn MediaConnection>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(SfuError::Transport("out of ports".to_string()));
        }
        let connection = FakeConnection::new(Some(handler), self.behavior.lock().clone());
        self.connections.lock().push(Arc::clone(&connection));
        Ok(connection)
    }
}

pub struct Harness {
    pub registry: Arc<SfuRegistry>,
    pub factory: Arc<FakeFactory>,
    pub negotiator: Negotiator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SfuConfig::default())
    }

    pub fn with_config(config: SfuConfig) -> Self {
        let registry = SfuRegistry::new(config);
        let factory = Arc::new(FakeFactory::default());
        let negotiator = Negotiator::new(Arc::clone(&registry), Arc::clone(&factory) as _);
        Self {
            registry,
            factory,
            negotiator,
        }
    }

    /// Join through the negotiator and return the peer's fake connection
    pub async fn join(&self, room: &str, peer: &str) -> Arc<FakeConnection> {
        self.negotiator
            .join(join_request(room, peer))
            .await
            .expect("join should succeed");
        self.factory.last()
    }

    /// Join and open a data channel on the new connection
    pub async fn join_with_channel(
        &self,
        room: &str,
        peer: &str,
    ) -> (Arc<FakeConnection>, Arc<FakeDataChannel>) {
        let connection = self.join(room, peer).await;
        let channel = FakeDataChannel::new("game-sync");
        connection.handler().on_data_channel(channel.clone()).await;
        (connection, channel)
    }
}

pub fn join_request(room: &str, peer: &str) -> JoinRequest {
    JoinRequest {
        room_id: room.to_string(),
        peer_id: peer.to_string(),
        offer: SessionDescription::offer("v=0\r\n"),
    }
}

pub fn packet(seq: u16) -> RtpPacket {
    let mut packet = RtpPacket::default();
    packet.header.sequence_number = seq;
    packet.payload = Bytes::from_static(b"frame");
    packet
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
