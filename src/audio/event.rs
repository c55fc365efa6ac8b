//! Media events delivered to a bridging session.
//!
//! These are transport-neutral: the WebSocket layer translates provider JSON
//! into [`SessionInput`] values and the session never sees wire formats.

use crate::audio::buffer::Track;
use std::collections::HashMap;

/// Encoding label announced for μ-law media.
pub const MULAW_ENCODING: &str = "audio/x-mulaw";

/// Codec parameters announced by the provider at stream start.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Identification and parameters carried by the start event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamStart {
    pub stream_sid: Option<String>,
    pub account_sid: Option<String>,
    pub call_sid: Option<String>,
    /// Tracks the provider says it will send
    pub tracks: Vec<String>,
    pub media_format: Option<MediaFormat>,
    /// Free-form parameters attached when the stream was requested
    pub custom_parameters: HashMap<String, String>,
}

/// One event from the media stream.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    Start(StreamStart),
    Media {
        track: Track,
        /// Base64 μ-law frame
        payload: String,
    },
    Stop,
}

/// How the underlying connection went away.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    /// Orderly close from the peer
    Normal,
    /// Protocol error, timeout or dropped transport
    Abnormal(String),
}

/// Everything a session task can receive.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    Event(MediaEvent),
    Disconnected(CloseReason),
}
