//! # Audio Bridging Module
//!
//! Everything that happens to call audio between the media-stream socket and
//! the downstream sink.
//!
//! ## Key Components:
//! - **Frame Decoder** (`codec`): base64 μ-law payloads to 16-bit PCM
//! - **Track Buffer** (`buffer`): per-direction PCM accumulator
//! - **Synchronizer/Mixer** (`mixer`): aligned chunking, SumMix and stereo
//!   policies, drain of residual audio
//! - **Audio Sink** (`sink`): consumer of mixed chunks
//! - **Connection Session** (`session`): per-connection state machine
//! - **Session Registry** (`registry`): live connections for the HTTP API
//!
//! ## Audio Format:
//! - **Input**: G.711 μ-law, 8-bit, one inbound and one outbound track
//! - **Output**: 16-bit little-endian PCM, mono (sum) or interleaved stereo

// The WebSocket transport lives in src/websocket.rs at the root level
pub mod buffer;
pub mod codec;
pub mod event;
pub mod mixer;
pub mod registry;
pub mod session;
pub mod sink;
