//! SFU Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// STUN server used when no STUN URL is configured
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// One ICE server entry (STUN or TURN)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// URLs for the ICE server (e.g., ["stun:stun.example.com:3478"])
    pub urls: Vec<String>,
    /// Username for TURN authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Credential for TURN authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Build the ICE server list from the raw deployment settings.
///
/// `stun_urls` is a comma separated list; blank entries are skipped and an
/// unset or empty list falls back to [`DEFAULT_STUN_URL`]. The TURN server is
/// only added when URL, username and credential are all present.
#[must_use]
pub fn ice_servers_from_parts(
    stun_urls: Option<&str>,
    turn_url: Option<&str>,
    turn_user: Option<&str>,
    turn_pass: Option<&str>,
) -> Vec<IceServer> {
    let stun_urls = stun_urls
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_STUN_URL);

    let mut servers: Vec<IceServer> = stun_urls
        .split(',')
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(IceServer::stun)
        .collect();

    let non_empty = |v: Option<&str>| v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    match (non_empty(turn_url), non_empty(turn_user), non_empty(turn_pass)) {
        (Some(url), Some(username), Some(credential)) => servers.push(IceServer {
            urls: vec![url],
            username: Some(username),
            credential: Some(credential),
        }),
        (None, None, None) => {}
        _ => warn!("Partial TURN configuration ignored (url, user and password are all required)"),
    }

    servers
}

/// SFU configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfuConfig {
    /// ICE servers handed to every new peer connection
    pub ice_servers: Vec<IceServer>,
    /// Remove a room from the registry as soon as its last peer leaves
    pub reap_empty_rooms: bool,
    /// Packets queued per inbound track before slow destinations start skipping.
    ///
    /// This bounds how far one destination may trail the sender; a lagging
    /// destination drops the oldest packets instead of adding latency.
    pub forward_queue_packets: usize,
    /// Upper bound for closing one peer connection (milliseconds)
    pub close_timeout_ms: u64,
    /// How long the answer waits for local ICE gathering (milliseconds, 0 = don't wait)
    pub ice_gather_timeout_ms: u64,
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::stun(DEFAULT_STUN_URL)],
            reap_empty_rooms: true,
            forward_queue_packets: 64,
            close_timeout_ms: 2000,
            ice_gather_timeout_ms: 2000,
        }
    }
}

impl SfuConfig {
    #[must_use]
    pub const fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    #[must_use]
    pub const fn ice_gather_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_gather_timeout_ms)
    }
}
