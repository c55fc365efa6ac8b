//! # Telephony Frame Decoding
//!
//! Converts one wire-format media frame (base64 text carrying G.711 μ-law bytes)
//! into linear 16-bit PCM samples ready for the track buffers.
//!
//! ## Format:
//! - **Transport**: standard base64 alphabet with padding
//! - **Codec**: μ-law, one byte per sample, 8kHz mono
//! - **Output**: one `i16` sample per input byte
//!
//! Decoding is a pure table lookup, so a frame either decodes completely or is
//! rejected as a whole and skipped by the caller.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

/// Linear samples produced from one frame.
pub type SampleBuffer = Vec<i16>;

/// Why a single frame could not be decoded.
///
/// None of these end a session; the session drops the frame and keeps going.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload was not valid base64
    #[error("payload is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// The payload decoded to zero bytes
    #[error("payload contains no audio")]
    Empty,

    /// The bytes could not be treated as a μ-law frame
    #[error("codec error: {0}")]
    Codec(String),
}

/// Expansion of every possible μ-law byte, built at compile time.
static MULAW_TO_LINEAR: [i16; 256] = build_mulaw_table();

const fn build_mulaw_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = expand_mulaw(i as u8);
        i += 1;
    }
    table
}

/// ITU-T G.711 μ-law expansion.
///
/// The byte is stored inverted; bit 7 is the sign (set = positive), bits 4-6 the
/// segment and bits 0-3 the step within the segment. The 0x84 bias (132) added
/// by the encoder is removed here.
const fn expand_mulaw(compressed: u8) -> i16 {
    let inverted = !compressed as i16;
    let exponent = (inverted >> 4) & 0x07;
    let mantissa = inverted & 0x0F;
    let step = 4 << (exponent + 1);

    let magnitude = (0x80 << exponent) + step * mantissa + step / 2 - 4 * 33;

    if compressed < 0x80 {
        -magnitude
    } else {
        magnitude
    }
}

/// Decode one μ-law byte into a linear sample.
#[inline]
pub fn mulaw_to_linear(byte: u8) -> i16 {
    MULAW_TO_LINEAR[byte as usize]
}

/// Stateless decoder for the media frames of one session.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    /// Largest accepted frame, in encoded bytes
    max_frame_bytes: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    /// Decode a base64 μ-law payload into linear PCM.
    ///
    /// ## Returns:
    /// - **Ok(samples)**: exactly one sample per encoded byte
    /// - **Err(DecodeError)**: the frame should be skipped
    pub fn decode(&self, payload: &str) -> Result<SampleBuffer, DecodeError> {
        let bytes = STANDARD.decode(payload.trim())?;

        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        if bytes.len() > self.max_frame_bytes {
            return Err(DecodeError::Codec(format!(
                "frame of {} bytes exceeds the {} byte limit",
                bytes.len(),
                self.max_frame_bytes
            )));
        }

        Ok(bytes.iter().map(|&byte| mulaw_to_linear(byte)).collect())
    }
}
