//! # Audio Sinks
//!
//! A sink is the consumer of mixed audio for one session. It is opened when the
//! stream starts, receives every [`MixedChunk`] in order and is closed exactly
//! once when the session ends.
//!
//! ## Write Semantics:
//! `write` only returns once the chunk has been accepted (for the forwarding
//! sink: flushed to the downstream socket). Because the session awaits every
//! write before taking more audio from its buffers, a slow sink throttles the
//! whole session. This is the bridge's only backpressure.
//!
//! ## Available Sinks:
//! - **ForwardSink**: relays PCM to a downstream WebSocket listener
//! - **DiscardSink**: counts and drops chunks (monitoring / development)

use crate::audio::buffer::SAMPLE_WIDTH;
use crate::audio::event::StreamStart;
use crate::audio::mixer::{MixedChunk, OutputFormat};
use crate::config::{SinkConfig, SinkKind};
use futures_util::SinkExt;
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

/// Start-event custom parameter that overrides the configured forward URL.
pub const FORWARD_URL_PARAMETER: &str = "forwardUrl";

/// Failures that end a session.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("no forward URL configured for this stream")]
    NoTarget,

    #[error("sink used before it was opened")]
    NotOpen,

    #[error("forwarding failed: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("failed to encode sink header: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Consumer of mixed audio chunks.
///
/// The session guarantees the call order `open`, zero or more `write`s, then a
/// single `close`; `close` is also called if a write fails.
pub trait AudioSink {
    async fn open(&mut self, format: OutputFormat, start: &StreamStart) -> Result<(), SinkError>;

    async fn write(&mut self, chunk: &MixedChunk) -> Result<(), SinkError>;

    async fn close(&mut self);
}

/// Accepts everything and keeps count.
#[derive(Debug, Default)]
pub struct DiscardSink {
    chunks: u64,
    bytes: u64,
}

impl AudioSink for DiscardSink {
    async fn open(&mut self, format: OutputFormat, start: &StreamStart) -> Result<(), SinkError> {
        info!(
            stream_sid = start.stream_sid.as_deref().unwrap_or("unknown"),
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Discard sink opened"
        );
        Ok(())
    }

    async fn write(&mut self, chunk: &MixedChunk) -> Result<(), SinkError> {
        self.chunks += 1;
        self.bytes += (chunk.samples.len() * SAMPLE_WIDTH) as u64;
        trace!(frames = chunk.frames(), "Discarded mixed chunk");
        Ok(())
    }

    async fn close(&mut self) {
        info!(chunks = self.chunks, bytes = self.bytes, "Discard sink closed");
    }
}

type ForwardSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Relays mixed PCM to a downstream WebSocket listener.
///
/// ## Downstream Protocol:
/// 1. One text frame describing the audio (`event: "format"`)
/// 2. One binary frame of little-endian 16-bit PCM per mixed chunk
/// 3. A close frame when the call ends
pub struct ForwardSink {
    default_url: Option<String>,
    socket: Option<ForwardSocket>,
}

impl ForwardSink {
    pub fn new(default_url: Option<String>) -> Self {
        Self {
            default_url,
            socket: None,
        }
    }

    fn target_url(&self, start: &StreamStart) -> Option<String> {
        start
            .custom_parameters
            .get(FORWARD_URL_PARAMETER)
            .filter(|url| !url.is_empty())
            .cloned()
            .or_else(|| self.default_url.clone())
    }
}

impl AudioSink for ForwardSink {
    async fn open(&mut self, format: OutputFormat, start: &StreamStart) -> Result<(), SinkError> {
        let url = self.target_url(start).ok_or(SinkError::NoTarget)?;

        let (mut socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|source| SinkError::Connect {
                url: url.clone(),
                source,
            })?;

        let header = json!({
            "event": "format",
            "encoding": "audio/l16",
            "sampleRate": format.sample_rate,
            "channels": format.channels,
            "streamSid": start.stream_sid,
            "callSid": start.call_sid,
        });
        socket.send(Message::Text(serde_json::to_string(&header)?)).await?;

        info!(url = %url, "Forwarding mixed audio");
        self.socket = Some(socket);
        Ok(())
    }

    async fn write(&mut self, chunk: &MixedChunk) -> Result<(), SinkError> {
        let socket = self.socket.as_mut().ok_or(SinkError::NotOpen)?;
        socket.send(Message::Binary(chunk.to_le_bytes())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            match socket.close(None).await {
                Ok(()) => debug!("Forward socket closed"),
                Err(err) => warn!("Forward socket did not close cleanly: {}", err),
            }
        }
    }
}

/// Sink selected by configuration.
pub enum ConfiguredSink {
    Discard(DiscardSink),
    Forward(ForwardSink),
}

impl ConfiguredSink {
    pub fn from_config(config: &SinkConfig) -> Self {
        match config.kind {
            SinkKind::Discard => ConfiguredSink::Discard(DiscardSink::default()),
            SinkKind::Forward => ConfiguredSink::Forward(ForwardSink::new(config.forward_url.clone())),
        }
    }
}

impl AudioSink for ConfiguredSink {
    async fn open(&mut self, format: OutputFormat, start: &StreamStart) -> Result<(), SinkError> {
        match self {
            ConfiguredSink::Discard(sink) => sink.open(format, start).await,
            ConfiguredSink::Forward(sink) => sink.open(format, start).await,
        }
    }

    async fn write(&mut self, chunk: &MixedChunk) -> Result<(), SinkError> {
        match self {
            ConfiguredSink::Discard(sink) => sink.write(chunk).await,
            ConfiguredSink::Forward(sink) => sink.write(chunk).await,
        }
    }

    async fn close(&mut self) {
        match self {
            ConfiguredSink::Discard(sink) => sink.close().await,
            ConfiguredSink::Forward(sink) => sink.close().await,
        }
    }
}
