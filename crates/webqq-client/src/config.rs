//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/webqq/config.toml` by default. Every section and key is
//! optional; a missing file yields the defaults below.
//!
//! ```toml
//! [poll]
//! request_timeout_secs = 90
//!
//! [queue]
//! capacity = 4096
//! overflow = "block"
//!
//! [media]
//! mode = "inline"
//!
//! [log]
//! install = true
//! level = "debug"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use webqq_core::tracing::LogSettings;

use crate::error::{ClientError, ClientResult};
use crate::media::MediaMode;
use crate::poller::PollerConfig;
use crate::queue::OverflowPolicy;

/// Upper bound accepted for `poll.max_backoff_secs` (one day).
pub const MAX_BACKOFF_SECS: u64 = 24 * 60 * 60;

/// Configuration for the message client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server endpoints and referers.
    pub endpoints: EndpointSettings,

    /// Long-poll loop settings.
    pub poll: PollSettings,

    /// Receive queue settings.
    pub queue: QueueSettings,

    /// Image download settings.
    pub media: MediaSettings,

    /// Outgoing message settings.
    pub send: SendSettings,

    /// Image upload settings.
    pub upload: UploadSettings,

    /// Log output installed by the client on startup.
    pub log: LogSettings,
}

/// Server endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    /// Base URL of the message channel (`poll2`, `send_buddy_msg2`, ...).
    pub channel: String,
    /// HTTPS base of the channel, used for the group signature.
    pub secure_channel: String,
    /// Group custom face download endpoint.
    pub group_pic: String,
    /// Offline picture upload endpoint.
    pub offline_upload: String,
    /// Custom face upload endpoint.
    pub cface_upload: String,
    /// Referer sent with channel requests.
    pub channel_referer: String,
    /// Referer sent with picture downloads and uploads.
    pub web_referer: String,
    /// Referer sent with the group signature request.
    pub signature_referer: String,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            channel: "http://d.web2.qq.com/channel".to_string(),
            secure_channel: "https://d.web2.qq.com/channel".to_string(),
            group_pic: "http://web2.qq.com/cgi-bin/get_group_pic".to_string(),
            offline_upload: "http://weboffline.ftn.qq.com/ftn_access/upload_offline_pic"
                .to_string(),
            cface_upload: "http://up.web2.qq.com/cgi-bin/cface_upload".to_string(),
            channel_referer: "http://d.web2.qq.com/proxy.html?v=20101025002".to_string(),
            web_referer: "http://web2.qq.com/".to_string(),
            signature_referer: "https://d.web2.qq.com/cfproxy.html?v=20110331002&callback=1"
                .to_string(),
        }
    }
}

/// Long-poll loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Timeout of a single poll request in seconds. The server holds the
    /// request for up to a minute when there is nothing to deliver.
    pub request_timeout_secs: u64,
    /// Delay after the first failure in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound of the failure delay in seconds.
    pub max_backoff_secs: u64,
    /// Growth factor of the delay per consecutive failure.
    pub backoff_multiplier: f64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 120,
            initial_backoff_ms: 1000,
            max_backoff_secs: 60,
            backoff_multiplier: 2.0,
        }
    }
}

impl PollSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Builds the poller configuration from these settings.
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            request_timeout: self.request_timeout(),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

/// Receive queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Maximum queued messages; 0 means unbounded.
    pub capacity: usize,
    /// What to do when the queue is full.
    pub overflow: OverflowPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: 1024,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Image download settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    pub mode: MediaMode,
    /// Timeout for all downloads of one message, in seconds.
    pub timeout_secs: u64,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            mode: MediaMode::default(),
            timeout_secs: 30,
        }
    }
}

impl MediaSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Outgoing message settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendSettings {
    /// Maximum size of the encoded content array.
    pub max_content_bytes: usize,
    /// Maximum size of the whole form body.
    pub max_body_bytes: usize,
    /// Font name used by `send_text`.
    pub font_name: String,
    /// Font size used by `send_text`.
    pub font_size: i32,
}

impl Default for SendSettings {
    fn default() -> Self {
        Self {
            max_content_bytes: webqq_protocol::MAX_CONTENT_SIZE,
            max_body_bytes: 256 * 1024,
            font_name: "宋体".to_string(),
            font_size: 13,
        }
    }
}

/// Image upload settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// `peeruin` sent with offline picture uploads instead of the recipient.
    pub peer_uin: Option<String>,
    /// Upload request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            peer_uin: None,
            timeout_secs: 60,
        }
    }
}

impl UploadSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ClientConfig {
    /// Loads configuration from the default path, or the defaults if the
    /// file does not exist.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::configuration(format!("failed to read {}", path.display())).with_source(e)
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            ClientError::configuration(format!("failed to parse {}", path.display()))
                .with_source(e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would make the client misbehave.
    pub fn validate(&self) -> ClientResult<()> {
        if self.poll.backoff_multiplier < 1.0 {
            return Err(ClientError::configuration(
                "poll.backoff_multiplier must be at least 1.0",
            ));
        }
        if self.send.max_body_bytes < self.send.max_content_bytes {
            return Err(ClientError::configuration(
                "send.max_body_bytes must not be smaller than send.max_content_bytes",
            ));
        }
        if self.poll.max_backoff_secs > MAX_BACKOFF_SECS {
            return Err(ClientError::configuration(format!(
                "poll.max_backoff_secs must not exceed {MAX_BACKOFF_SECS}"
            )));
        }
        self.log.validate().map_err(|e| {
            ClientError::configuration("invalid [log] section").with_source(e)
        })?;
        if self.send.font_name.is_empty() {
            return Err(ClientError::configuration("send.font_name must not be empty"));
        }
        Ok(())
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("webqq")
    }
}
