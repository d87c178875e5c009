//! `webrtc` implementation of the transport traits

use crate::config::{IceServer, SfuConfig};
use crate::error::{Result, SfuError};
use crate::transport::{
    ConnectionFactory, ConnectionHandler, ConnectionState, DataSink, FeedbackSource,
    InboundTrack, MediaConnection, OutboundStream, OutboundTrackSpec, PacketSink, RtpPacket,
    SdpKind, SessionDescription, TrackCodec, TrackKind,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

impl From<RTPCodecType> for TrackKind {
    fn from(codec_type: RTPCodecType) -> Self {
        match codec_type {
            RTPCodecType::Audio => Self::Audio,
            _ => Self::Video,
        }
    }
}

/// Creates one `RTCPeerConnection` per join, each with its own media engine
pub struct WebRtcConnectionFactory {
    ice_servers: Vec<IceServer>,
    gather_timeout: Duration,
}

impl WebRtcConnectionFactory {
    #[must_use]
    pub fn new(config: &SfuConfig) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
            gather_timeout: config.ice_gather_timeout(),
        }
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = self
            .ice_servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone().unwrap_or_default(),
                credential: s.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ConnectionFactory for WebRtcConnectionFactory {
    async fn create(&self, handler: Arc<dyn ConnectionHandler>) -> Result<Arc<dyn MediaConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(self.rtc_configuration()).await?);
        install_handlers(&pc, handler);

        Ok(Arc::new(WebRtcConnection {
            pc,
            gather_timeout: self.gather_timeout,
        }))
    }
}

fn install_handlers(pc: &RTCPeerConnection, handler: Arc<dyn ConnectionHandler>) {
    let h = Arc::clone(&handler);
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let h = Arc::clone(&h);
        Box::pin(async move {
            if let Some(state) = map_state(state) {
                h.on_state_change(state).await;
            }
        })
    }));

    let h = Arc::clone(&handler);
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let h = Arc::clone(&h);
        Box::pin(async move {
            let candidate = candidate
                .and_then(|c| c.to_json().ok())
                .map(|init| init.candidate);
            h.on_ice_candidate(candidate).await;
        })
    }));

    let h = Arc::clone(&handler);
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let h = Arc::clone(&h);
            Box::pin(async move {
                h.on_track(Arc::new(RemoteTrack(track))).await;
            })
        },
    ));

    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let h = Arc::clone(&handler);
        Box::pin(async move {
            let relay = Arc::clone(&h);
            dc.on_message(Box::new(move |msg: DataChannelMessage| {
                let relay = Arc::clone(&relay);
                Box::pin(async move {
                    relay.on_data_message(msg.data).await;
                })
            }));
            h.on_data_channel(Arc::new(DataChannel(dc))).await;
        })
    }));
}

const fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpKind::Rollback => {
            return Err(SfuError::InvalidSdp("rollback is not supported".to_string()))
        }
    };
    parsed.map_err(|e| SfuError::InvalidSdp(e.to_string()))
}

fn from_rtc(desc: &RTCSessionDescription) -> Result<SessionDescription> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        _ => return Err(SfuError::InvalidSdp("unspecified description type".to_string())),
    };
    Ok(SessionDescription {
        kind,
        sdp: desc.sdp.clone(),
    })
}

/// A read error that means the track is gone rather than broken.
///
/// A closed receive buffer surfaces wrapped by whichever layer read it: the
/// interceptor chain, the SRTP session, or both.
fn is_end_of_stream(err: &webrtc::Error) -> bool {
    use webrtc::{interceptor, srtp, util};

    let srtp_closed = |e: &srtp::Error| {
        matches!(
            e,
            srtp::Error::SessionSrtpAlreadyClosed | srtp::Error::Util(util::Error::ErrBufferClosed)
        )
    };

    match err {
        webrtc::Error::ErrClosedPipe
        | webrtc::Error::ErrConnectionClosed
        | webrtc::Error::Util(util::Error::ErrBufferClosed)
        | webrtc::Error::Interceptor(interceptor::Error::Util(util::Error::ErrBufferClosed)) => {
            true
        }
        webrtc::Error::Srtp(e) | webrtc::Error::Interceptor(interceptor::Error::Srtp(e)) => {
            srtp_closed(e)
        }
        _ => false,
    }
}

struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
    gather_timeout: Duration,
}

#[async_trait]
impl MediaConnection for WebRtcConnection {
    async fn set_remote_description(&self, offer: SessionDescription) -> Result<()> {
        let offer = to_rtc(offer)?;
        self.pc.set_remote_description(offer).await?;
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        from_rtc(&answer)
    }

    async fn set_local_description(&self, answer: SessionDescription) -> Result<()> {
        let answer = to_rtc(answer)?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(answer).await?;

        if !self.gather_timeout.is_zero()
            && tokio::time::timeout(self.gather_timeout, gathered.recv())
                .await
                .is_err()
        {
            debug!(
                timeout_ms = self.gather_timeout.as_millis() as u64,
                "ICE gathering still running, answering with the candidates gathered so far"
            );
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description().await?;
        from_rtc(&desc).ok()
    }

    async fn add_outbound_track(&self, spec: &OutboundTrackSpec) -> Result<OutboundStream> {
        let capability = RTCRtpCodecCapability {
            mime_type: spec.codec.mime_type.clone(),
            clock_rate: spec.codec.clock_rate,
            channels: spec.codec.channels,
            sdp_fmtp_line: spec.codec.sdp_fmtp_line.clone(),
            ..Default::default()
        };

        let track = Arc::new(TrackLocalStaticRTP::new(
            capability,
            spec.track_id.clone(),
            spec.stream_id.clone(),
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        Ok(OutboundStream {
            sink: Arc::new(LocalTrack(track)),
            feedback: Arc::new(SenderFeedback(sender)),
        })
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

struct RemoteTrack(Arc<TrackRemote>);

#[async_trait]
impl InboundTrack for RemoteTrack {
    fn id(&self) -> String {
        self.0.id()
    }

    fn kind(&self) -> TrackKind {
        TrackKind::from(self.0.kind())
    }

    fn codec(&self) -> TrackCodec {
        let capability = self.0.codec().capability;
        TrackCodec {
            mime_type: capability.mime_type,
            clock_rate: capability.clock_rate,
            channels: capability.channels,
            sdp_fmtp_line: capability.sdp_fmtp_line,
        }
    }

    async fn read_packet(&self) -> Result<Option<RtpPacket>> {
        match self.0.read_rtp().await {
            Ok((packet, _attributes)) => Ok(Some(packet)),
            Err(err) if is_end_of_stream(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

struct LocalTrack(Arc<TrackLocalStaticRTP>);

#[async_trait]
impl PacketSink for LocalTrack {
    async fn write_packet(&self, packet: &RtpPacket) -> Result<()> {
        self.0.write_rtp(packet).await?;
        Ok(())
    }
}

struct SenderFeedback(Arc<RTCRtpSender>);

#[async_trait]
impl FeedbackSource for SenderFeedback {
    async fn read_feedback(&self) -> Result<usize> {
        let (packets, _attributes) = self.0.read_rtcp().await?;
        Ok(packets.len())
    }
}

struct DataChannel(Arc<RTCDataChannel>);

#[async_trait]
impl DataSink for DataChannel {
    fn label(&self) -> String {
        self.0.label().to_string()
    }

    async fn send(&self, payload: &Bytes) -> Result<()> {
        self.0.send(payload).await?;
        Ok(())
    }
}
