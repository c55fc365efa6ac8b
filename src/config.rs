//! # Configuration Management
//!
//! This module handles loading and managing bridge configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with BRIDGE_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **enums with rename_all**: Config strings like `"stereo"` map straight onto enum variants
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (BRIDGE_SERVER__PORT, BRIDGE_AUDIO__MIXING_POLICY, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Session Scope:
//! Audio and sink settings are read once when a media stream connects. A runtime
//! update only affects connections accepted after it.

use crate::audio::buffer::SAMPLE_WIDTH;
use crate::audio::mixer::{MixingPolicy, MAX_SUM_SCALE};
use crate::audio::session::{BufferLimit, SessionSettings};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Upper bound on a single track's chunk; 4 seconds of 8 kHz 16-bit audio.
pub const MAX_CHUNK_BYTES: usize = 64 * 1024;

/// Main bridge configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, performance, audio, sink)
/// keeps each concern's validation rules next to its fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub performance: PerformanceConfig,
    pub audio: AudioConfig,
    pub sink: SinkConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Connection handling limits.
///
/// ## Fields:
/// - `max_concurrent_sessions`: Media streams accepted at once; further upgrades get 503
/// - `heartbeat_interval_secs`: How often the server pings each media socket
/// - `client_timeout_secs`: Silence after which a media socket is treated as dead
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

/// Which mixing policy new sessions use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    Sum,
    Stereo,
}

/// What a session does when one track buffer passes `max_buffered_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest whole samples down to the limit
    DropOldest,
    /// End the session (residual audio is still drained)
    Disconnect,
}

/// Audio format and mixing settings.
///
/// ## Chunk Size:
/// Each mix step consumes `sample_width × frames_per_chunk` bytes from both
/// tracks. At 8 kHz, 160 frames is 20 ms of audio.
///
/// ## Buffer Bound:
/// `max_buffered_bytes = 0` leaves track buffers unbounded, which is how a
/// healthy call runs: the drain at stop flushes whatever is left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub sample_width: usize,
    pub frames_per_chunk: usize,
    pub channels: u16,
    pub mixing_policy: PolicyKind,
    pub sum_scale: f32,
    pub max_frame_bytes: usize,
    pub max_buffered_bytes: usize,
    pub overflow_policy: OverflowPolicy,
}

/// Where mixed audio goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Discard,
    Forward,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub kind: SinkKind,
    /// Downstream WebSocket URL for the forward sink
    pub forward_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8080,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 50,
                heartbeat_interval_secs: 10,
                client_timeout_secs: 30,
            },
            audio: AudioConfig {
                sample_rate: 8000,              // Telephony narrowband
                sample_width: SAMPLE_WIDTH,
                frames_per_chunk: 160,          // 20 ms at 8 kHz
                channels: 1,
                mixing_policy: PolicyKind::Sum,
                sum_scale: MAX_SUM_SCALE,
                max_frame_bytes: 8192,
                max_buffered_bytes: 0,          // Unbounded
                overflow_policy: OverflowPolicy::DropOldest,
            },
            sink: SinkConfig {
                kind: SinkKind::Discard,
                forward_url: None,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with BRIDGE_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `BRIDGE_SERVER__PORT=3000`: Override server port
    /// - `BRIDGE_AUDIO__MIXING_POLICY=stereo`: Switch new sessions to stereo
    /// - `BRIDGE_SINK__FORWARD_URL=ws://127.0.0.1:9000/audio`: Downstream listener
    ///
    /// The double underscore separates sections, so field names that contain a
    /// single underscore (`mixing_policy`) survive intact.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("BRIDGE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - At least one session is allowed and the client timeout outlasts the heartbeat
    /// - Audio is 16-bit, with non-zero rate, chunk and frame sizes
    /// - The channel count matches the policy (1 for sum, 2 for stereo)
    /// - The sum scale cannot clip
    /// - A buffer bound, if set, holds at least one chunk
    /// - The forward sink has somewhere to forward to
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.performance.heartbeat_interval_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval must be greater than 0"));
        }

        if self.performance.client_timeout_secs <= self.performance.heartbeat_interval_secs {
            return Err(anyhow::anyhow!(
                "Client timeout ({}s) must be greater than the heartbeat interval ({}s)",
                self.performance.client_timeout_secs,
                self.performance.heartbeat_interval_secs
            ));
        }

        self.audio.validate()?;

        if self.sink.kind == SinkKind::Forward
            && self.sink.forward_url.as_deref().map_or(true, str::is_empty)
        {
            return Err(anyhow::anyhow!("Forward sink requires sink.forward_url"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON change. For example,
    /// `{"audio": {"mixing_policy": "stereo", "channels": 2}}` switches new
    /// sessions to stereo output and leaves everything else alone.
    ///
    /// Enum fields accept the same strings as config.toml. The result is
    /// validated before it is returned.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Port {} is out of range", port))?;
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance.get("max_concurrent_sessions").and_then(|v| v.as_u64()) {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
            if let Some(heartbeat) = performance.get("heartbeat_interval_secs").and_then(|v| v.as_u64()) {
                self.performance.heartbeat_interval_secs = heartbeat;
            }
            if let Some(timeout) = performance.get("client_timeout_secs").and_then(|v| v.as_u64()) {
                self.performance.client_timeout_secs = timeout;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(rate) = audio.get("sample_rate").and_then(|v| v.as_u64()) {
                self.audio.sample_rate = u32::try_from(rate)
                    .map_err(|_| anyhow::anyhow!("Sample rate {} is out of range", rate))?;
            }
            if let Some(width) = audio.get("sample_width").and_then(|v| v.as_u64()) {
                self.audio.sample_width = width as usize;
            }
            if let Some(frames) = audio.get("frames_per_chunk").and_then(|v| v.as_u64()) {
                self.audio.frames_per_chunk = frames as usize;
            }
            if let Some(channels) = audio.get("channels").and_then(|v| v.as_u64()) {
                self.audio.channels = u16::try_from(channels)
                    .map_err(|_| anyhow::anyhow!("Channel count {} is out of range", channels))?;
            }
            if let Some(policy) = audio.get("mixing_policy") {
                self.audio.mixing_policy = serde_json::from_value(policy.clone())?;
            }
            if let Some(scale) = audio.get("sum_scale").and_then(|v| v.as_f64()) {
                self.audio.sum_scale = scale as f32;
            }
            if let Some(max_frame) = audio.get("max_frame_bytes").and_then(|v| v.as_u64()) {
                self.audio.max_frame_bytes = max_frame as usize;
            }
            if let Some(max_buffered) = audio.get("max_buffered_bytes").and_then(|v| v.as_u64()) {
                self.audio.max_buffered_bytes = max_buffered as usize;
            }
            if let Some(overflow) = audio.get("overflow_policy") {
                self.audio.overflow_policy = serde_json::from_value(overflow.clone())?;
            }
        }

        if let Some(sink) = partial_config.get("sink") {
            if let Some(kind) = sink.get("kind") {
                self.sink.kind = serde_json::from_value(kind.clone())?;
            }
            match sink.get("forward_url") {
                Some(serde_json::Value::Null) => self.sink.forward_url = None,
                Some(url) => {
                    if let Some(url) = url.as_str() {
                        self.sink.forward_url = Some(url.to_string());
                    }
                }
                None => {}
            }
        }

        self.validate()?;
        Ok(())
    }
}

impl AudioConfig {
    /// Bytes each track must hold before a mix step.
    pub fn chunk_bytes(&self) -> usize {
        self.sample_width.saturating_mul(self.frames_per_chunk)
    }

    /// Build the configured mixing policy.
    pub fn mixing_policy(&self) -> Result<MixingPolicy> {
        let policy = match self.mixing_policy {
            PolicyKind::Sum => MixingPolicy::sum_mix(self.sum_scale)?,
            PolicyKind::Stereo => MixingPolicy::StereoChannels,
        };
        Ok(policy)
    }

    /// Freeze these settings for a new session.
    pub fn session_settings(&self) -> Result<SessionSettings> {
        let buffer_limit = (self.max_buffered_bytes > 0).then(|| BufferLimit {
            max_bytes: self.max_buffered_bytes,
            policy: self.overflow_policy,
        });

        Ok(SessionSettings {
            policy: self.mixing_policy()?,
            chunk_bytes: self.chunk_bytes(),
            sample_rate: self.sample_rate,
            max_frame_bytes: self.max_frame_bytes,
            buffer_limit,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.sample_width != SAMPLE_WIDTH {
            return Err(anyhow::anyhow!(
                "Sample width must be {} bytes, got {}",
                SAMPLE_WIDTH,
                self.sample_width
            ));
        }

        if self.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rate must be greater than 0"));
        }

        if self.frames_per_chunk == 0 {
            return Err(anyhow::anyhow!("Frames per chunk must be greater than 0"));
        }

        match self.sample_width.checked_mul(self.frames_per_chunk) {
            Some(bytes) if bytes <= MAX_CHUNK_BYTES => {}
            _ => {
                return Err(anyhow::anyhow!(
                    "Frames per chunk ({}) exceeds the {} byte chunk limit",
                    self.frames_per_chunk,
                    MAX_CHUNK_BYTES
                ))
            }
        }

        if self.max_frame_bytes == 0 {
            return Err(anyhow::anyhow!("Max frame bytes must be greater than 0"));
        }

        let policy = self.mixing_policy()?;
        if self.channels != policy.output_channels() {
            return Err(anyhow::anyhow!(
                "Mixing policy '{}' produces {} channel(s), but channels is {}",
                policy.name(),
                policy.output_channels(),
                self.channels
            ));
        }

        if self.max_buffered_bytes != 0 && self.max_buffered_bytes < self.chunk_bytes() {
            return Err(anyhow::anyhow!(
                "Max buffered bytes ({}) must hold at least one chunk ({} bytes)",
                self.max_buffered_bytes,
                self.chunk_bytes()
            ));
        }

        Ok(())
    }
}
