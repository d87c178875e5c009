//! Roomcast SFU (Selective Forwarding Unit)
//!
//! Peers in a room send their media once to the server, which forwards every
//! inbound track to the other peers in the same room and relays data channel
//! messages between them.
//!
//! ## Architecture
//!
//! - **`SfuRegistry`**: Owns every live room, creates them lazily
//! - **`SfuRoom`**: Peer membership, data relay and track fan-out for one room
//! - **`SfuPeer`**: One participant's connection, data channel and closed signal
//! - **`Negotiator`**: Offer/answer exchange for one join request
//! - **`forward`**: Per-track reader and per-destination forwarding tasks
//!
//! The core only talks to the traits in [`transport`]. [`WebRtcConnectionFactory`]
//! implements them on top of `webrtc`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use roomcast_sfu::{JoinRequest, Negotiator, SessionDescription, SfuConfig, SfuRegistry, WebRtcConnectionFactory};
//!
//! let config = SfuConfig::default();
//! let factory = Arc::new(WebRtcConnectionFactory::new(&config));
//! let registry = SfuRegistry::new(config);
//! let negotiator = Negotiator::new(Arc::clone(&registry), factory);
//!
//! let answer = negotiator
//!     .join(JoinRequest {
//!         room_id: "lobby".into(),
//!         peer_id: "alice".into(),
//!         offer: SessionDescription::offer(sdp),
//!     })
//!     .await?;
//! ```

mod config;
mod error;
mod events;
pub mod forward;
mod negotiator;
mod peer;
mod registry;
mod room;
mod rtc;
pub mod transport;
mod types;

pub use config::{ice_servers_from_parts, IceServer, SfuConfig, DEFAULT_STUN_URL};
pub use error::{Result, SfuError};
pub use forward::TrackFanout;
pub use negotiator::{JoinError, JoinErrorKind, JoinRequest, NegotiationStep, Negotiator};
pub use peer::{PeerStats, SfuPeer};
pub use registry::{RegistryStats, SfuRegistry};
pub use room::{RoomStats, SfuRoom};
pub use rtc::WebRtcConnectionFactory;
pub use transport::{ConnectionState, SdpKind, SessionDescription};
pub use types::{PeerId, RoomId, TrackId};
