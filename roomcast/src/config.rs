use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use roomcast_sfu::{ice_servers_from_parts, SfuConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Legacy ICE variables read without the `ROOMCAST_` prefix
const LEGACY_ICE_VARS: [(&str, &str); 4] = [
    ("STUN_URLS", "ice.stun_urls"),
    ("TURN_URL", "ice.turn_url"),
    ("TURN_USER", "ice.turn_user"),
    ("TURN_PASS", "ice.turn_pass"),
];

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub ice: IceConfig,
    pub sfu: SfuSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Allowed CORS origins; empty allows any origin
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// STUN/TURN endpoints handed to clients' peer connections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    /// Comma separated STUN URLs
    pub stun_urls: Option<String>,
    pub turn_url: Option<String>,
    pub turn_user: Option<String>,
    pub turn_pass: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfuSettings {
    pub reap_empty_rooms: bool,
    pub forward_queue_packets: usize,
    pub close_timeout_ms: u64,
    pub ice_gather_timeout_ms: u64,
}

impl Default for SfuSettings {
    fn default() -> Self {
        let sfu = SfuConfig::default();
        Self {
            reap_empty_rooms: sfu.reap_empty_rooms,
            forward_queue_packets: sfu.forward_queue_packets,
            close_timeout_ms: sfu.close_timeout_ms,
            ice_gather_timeout_ms: sfu.ice_gather_timeout_ms,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. `STUN_URLS`, `TURN_URL`, `TURN_USER`, `TURN_PASS` (highest priority)
    /// 2. `ROOMCAST_*` environment variables (e.g. `ROOMCAST_SERVER__HTTP_PORT`)
    /// 3. Config file (if provided)
    /// 4. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        Self::load_with(config_file, |key| std::env::var(key).ok())
    }

    fn load_with(
        config_file: Option<&str>,
        legacy_var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if !Path::new(path).exists() {
                return Err(ConfigError::Message(format!("config file not found: {path}")));
            }
            builder = builder.add_source(File::with_name(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("ROOMCAST")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .try_parsing(true),
        );

        for (var, key) in LEGACY_ICE_VARS {
            builder = builder.set_override_option(key, legacy_var(var))?;
        }

        builder.build()?.try_deserialize()
    }

    /// Check the configuration for errors, returning every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must not be 0".to_string());
        }
        if self.server.cors_origins.iter().any(|o| o.trim().is_empty()) {
            errors.push("server.cors_origins must not contain empty entries".to_string());
        }
        if crate::logging::parse_log_level(&self.logging.level).is_err() {
            errors.push(format!("logging.level '{}' is not a valid level", self.logging.level));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            ));
        }
        if self.sfu.forward_queue_packets == 0 {
            errors.push("sfu.forward_queue_packets must be at least 1".to_string());
        }
        if self.sfu.close_timeout_ms == 0 {
            errors.push("sfu.close_timeout_ms must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Build the SFU core configuration
    #[must_use]
    pub fn sfu_config(&self) -> SfuConfig {
        SfuConfig {
            ice_servers: ice_servers_from_parts(
                self.ice.stun_urls.as_deref(),
                self.ice.turn_url.as_deref(),
                self.ice.turn_user.as_deref(),
                self.ice.turn_pass.as_deref(),
            ),
            reap_empty_rooms: self.sfu.reap_empty_rooms,
            forward_queue_packets: self.sfu.forward_queue_packets,
            close_timeout_ms: self.sfu.close_timeout_ms,
            ice_gather_timeout_ms: self.sfu.ice_gather_timeout_ms,
        }
    }
}
