//! # Track Buffer Management
//!
//! Each direction of a call gets its own append-only PCM accumulator. Decoded
//! frames are appended as little-endian 16-bit bytes and the synchronizer
//! consumes them from the front in chunk-sized pieces.
//!
//! ## Key Features:
//! - **Byte accounting**: lengths are measured in bytes so chunk sizes map
//!   directly onto the configured `sample_width × frames_per_chunk`
//! - **Whole samples only**: every append and every consume keeps the buffer
//!   a multiple of [`SAMPLE_WIDTH`]
//! - **Single owner**: a buffer belongs to exactly one session, so no locking

use byteorder::{LittleEndian, WriteBytesExt};
use std::fmt;

/// Bytes per linear PCM sample (16-bit).
pub const SAMPLE_WIDTH: usize = 2;

/// One of the two directional legs of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    /// Audio from the remote caller
    Inbound,
    /// Audio sent towards the remote caller
    Outbound,
}

impl Track {
    /// Parse a media-stream track label.
    ///
    /// Accepts both the short labels carried on media frames and the
    /// `*_track` spelling used when a stream is requested.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "inbound" | "inbound_track" => Some(Track::Inbound),
            "outbound" | "outbound_track" => Some(Track::Outbound),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Track::Inbound => "inbound",
            Track::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Growable PCM byte accumulator for a single track.
///
/// ## Memory Management:
/// Consumption removes bytes from the front of a `Vec<u8>`; the cost is
/// proportional to what remains, which stays near one chunk in steady state
/// because the synchronizer drains after every append.
#[derive(Debug, Default)]
pub struct TrackBuffer {
    bytes: Vec<u8>,
}

impl TrackBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append decoded samples as little-endian bytes.
    pub fn append(&mut self, samples: &[i16]) {
        self.bytes.reserve(samples.len() * SAMPLE_WIDTH);
        for &sample in samples {
            // Writing into a Vec cannot fail
            let _ = self.bytes.write_i16::<LittleEndian>(sample);
        }
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Remove and return the first `n` bytes.
    ///
    /// The caller guarantees `n <= len()` and that `n` is a whole number of
    /// samples; a larger request is clamped to what is buffered.
    pub fn take(&mut self, n: usize) -> Vec<u8> {
        debug_assert!(n % SAMPLE_WIDTH == 0, "take of a partial sample: {}", n);
        let n = n.min(self.bytes.len());
        self.bytes.drain(..n).collect()
    }

    /// Remove and return everything that is buffered.
    pub fn drain_all(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }

    /// Drop at least `n` of the oldest bytes, rounded up to a whole sample.
    ///
    /// Only the overflow policy uses this; it is the one path that consumes
    /// from a single track outside of draining.
    pub fn discard_front(&mut self, n: usize) -> usize {
        let rounded = n.div_ceil(SAMPLE_WIDTH) * SAMPLE_WIDTH;
        let n = rounded.min(self.bytes.len());
        self.bytes.drain(..n);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_stores_little_endian() {
        let mut buffer = TrackBuffer::new();
        buffer.append(&[1, -2]);

        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.take(4), vec![0x01, 0x00, 0xfe, 0xff]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_take_consumes_from_front() {
        let mut buffer = TrackBuffer::new();
        buffer.append(&[10, 20, 30]);

        let first = buffer.take(2);
        assert_eq!(first, 10i16.to_le_bytes().to_vec());
        assert_eq!(buffer.len(), 4);

        let rest = buffer.drain_all();
        assert_eq!(rest.len(), 4);
        assert_eq!(&rest[..2], &20i16.to_le_bytes());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_discard_front_rounds_to_whole_samples() {
        let mut buffer = TrackBuffer::new();
        buffer.append(&[1, 2, 3, 4]);

        assert_eq!(buffer.discard_front(3), 4);
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.take(2), 3i16.to_le_bytes().to_vec());
    }

    #[test]
    fn test_track_labels() {
        assert_eq!(Track::from_label("inbound"), Some(Track::Inbound));
        assert_eq!(Track::from_label("outbound_track"), Some(Track::Outbound));
        assert_eq!(Track::from_label("both_tracks"), None);
        assert_eq!(Track::Outbound.to_string(), "outbound");
    }
}
