//! # Track Synchronization and Mixing
//!
//! Pulls aligned, equal-length chunks out of the inbound and outbound track
//! buffers and combines them into one output chunk according to the session's
//! [`MixingPolicy`].
//!
//! ## Mixing Policies:
//! - **SumMix**: attenuate both chunks by `scale`, then add sample-by-sample
//!   with saturating arithmetic (mono output)
//! - **StereoChannels**: inbound on the left channel, outbound on the right,
//!   interleaved (stereo output, no arithmetic)
//!
//! ## Alignment:
//! During normal operation both buffers are only ever consumed together and by
//! the same amount. The drain step is the one place where a track is paired
//! with synthesized silence instead of real audio from the other track.

use crate::audio::buffer::{TrackBuffer, SAMPLE_WIDTH};
use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use thiserror::Error;

/// Largest SumMix scale for which two full-scale samples still fit in 16 bits.
pub const MAX_SUM_SCALE: f32 = 0.5;

/// Rejected mixing policy parameters.
#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("sum scale must be in (0, {max}], got {0}", max = MAX_SUM_SCALE)]
    ScaleOutOfRange(f32),
}

/// How two aligned windows of samples are combined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MixingPolicy {
    /// Attenuate each track by `scale` and sum into one mono channel
    SumMix { scale: f32 },
    /// Keep tracks apart: inbound left, outbound right
    StereoChannels,
}

impl MixingPolicy {
    /// Build a SumMix policy, rejecting scales that could clip.
    pub fn sum_mix(scale: f32) -> Result<Self, PolicyError> {
        if !(scale > 0.0 && scale <= MAX_SUM_SCALE) {
            return Err(PolicyError::ScaleOutOfRange(scale));
        }
        Ok(MixingPolicy::SumMix { scale })
    }

    /// Number of interleaved channels in the chunks this policy produces.
    pub fn output_channels(&self) -> u16 {
        match self {
            MixingPolicy::SumMix { .. } => 1,
            MixingPolicy::StereoChannels => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MixingPolicy::SumMix { .. } => "sum",
            MixingPolicy::StereoChannels => "stereo",
        }
    }

    /// Combine two equal-length windows of little-endian PCM bytes.
    pub fn mix(&self, inbound: &[u8], outbound: &[u8]) -> Vec<i16> {
        debug_assert_eq!(inbound.len(), outbound.len());
        let left = pcm_from_bytes(inbound);
        let right = pcm_from_bytes(outbound);

        match *self {
            MixingPolicy::SumMix { scale } => left
                .iter()
                .zip(right.iter())
                .map(|(&a, &b)| attenuate(a, scale).saturating_add(attenuate(b, scale)))
                .collect(),
            MixingPolicy::StereoChannels => {
                let mut interleaved = Vec::with_capacity(left.len() * 2);
                for (&l, &r) in left.iter().zip(right.iter()) {
                    interleaved.push(l);
                    interleaved.push(r);
                }
                interleaved
            }
        }
    }
}

/// Scale a sample, truncating toward zero.
#[inline]
fn attenuate(sample: i16, scale: f32) -> i16 {
    // float-to-int `as` saturates, so this can never wrap
    (sample as f32 * scale) as i16
}

fn pcm_from_bytes(bytes: &[u8]) -> Vec<i16> {
    let mut samples = vec![0i16; bytes.len() / SAMPLE_WIDTH];
    LittleEndian::read_i16_into(&bytes[..samples.len() * SAMPLE_WIDTH], &mut samples);
    samples
}

/// Shape of the audio handed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// One playback unit produced by a mix step.
#[derive(Debug, Clone, PartialEq)]
pub struct MixedChunk {
    /// Interleaved samples (`channels` per frame)
    pub samples: Vec<i16>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl MixedChunk {
    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Serialize as little-endian 16-bit PCM.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.samples.len() * SAMPLE_WIDTH];
        LittleEndian::write_i16_into(&self.samples, &mut bytes);
        bytes
    }
}

/// Lockstep consumer of a session's two track buffers.
#[derive(Debug, Clone)]
pub struct Synchronizer {
    policy: MixingPolicy,
    chunk_bytes: usize,
    sample_rate: u32,
}

impl Synchronizer {
    /// ## Parameters:
    /// - **policy**: fixed for the lifetime of the session
    /// - **chunk_bytes**: bytes required from *each* track per mix step
    /// - **sample_rate**: stamped onto every emitted chunk
    pub fn new(policy: MixingPolicy, chunk_bytes: usize, sample_rate: u32) -> Self {
        debug_assert!(chunk_bytes > 0 && chunk_bytes % SAMPLE_WIDTH == 0);
        Self {
            policy,
            chunk_bytes,
            sample_rate,
        }
    }

    pub fn policy(&self) -> MixingPolicy {
        self.policy
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat {
            sample_rate: self.sample_rate,
            channels: self.policy.output_channels(),
        }
    }

    /// Run one normal mix step.
    ///
    /// Returns `None` unless both tracks hold at least a full chunk; otherwise
    /// consumes exactly `chunk_bytes` from each and returns the mixed result.
    /// Callers loop on this until it yields `None`.
    pub fn next_chunk(
        &self,
        inbound: &mut TrackBuffer,
        outbound: &mut TrackBuffer,
    ) -> Option<MixedChunk> {
        if inbound.len().min(outbound.len()) < self.chunk_bytes {
            return None;
        }

        let in_chunk = inbound.take(self.chunk_bytes);
        let out_chunk = outbound.take(self.chunk_bytes);
        Some(self.build(&in_chunk, &out_chunk))
    }

    /// Run one drain step at end of stream.
    ///
    /// Whatever both tracks still have in common is paired first, in slices of
    /// at most one chunk. Once one side is exhausted the other is emitted in
    /// chunk-sized (or final shorter) slices against silence. Returns `None`
    /// once both buffers are empty.
    pub fn next_drain_chunk(
        &self,
        inbound: &mut TrackBuffer,
        outbound: &mut TrackBuffer,
    ) -> Option<MixedChunk> {
        let common = inbound.len().min(outbound.len()).min(self.chunk_bytes);
        if common > 0 {
            let in_chunk = inbound.take(common);
            let out_chunk = outbound.take(common);
            return Some(self.build(&in_chunk, &out_chunk));
        }

        if !inbound.is_empty() {
            let in_chunk = inbound.take(inbound.len().min(self.chunk_bytes));
            let silence = vec![0u8; in_chunk.len()];
            return Some(self.build(&in_chunk, &silence));
        }

        if !outbound.is_empty() {
            let out_chunk = outbound.take(outbound.len().min(self.chunk_bytes));
            let silence = vec![0u8; out_chunk.len()];
            return Some(self.build(&silence, &out_chunk));
        }

        None
    }

    fn build(&self, inbound: &[u8], outbound: &[u8]) -> MixedChunk {
        MixedChunk {
            samples: self.policy.mix(inbound, outbound),
            channels: self.policy.output_channels(),
            sample_rate: self.sample_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(samples: &[i16]) -> TrackBuffer {
        let mut buffer = TrackBuffer::new();
        buffer.append(samples);
        buffer
    }

    #[test]
    fn test_sum_mix_scales_then_adds() {
        let sync = Synchronizer::new(MixingPolicy::sum_mix(0.5).unwrap(), 8, 8000);
        let mut inbound = buffer_with(&[10, 20, 30, 40]);
        let mut outbound = buffer_with(&[1, 2, 3, 4]);

        let chunk = sync.next_chunk(&mut inbound, &mut outbound).unwrap();

        // [5,10,15,20] + [0,1,1,2]
        assert_eq!(chunk.samples, vec![5, 11, 16, 22]);
        assert_eq!(chunk.channels, 1);
        assert!(inbound.is_empty() && outbound.is_empty());
        assert!(sync.next_chunk(&mut inbound, &mut outbound).is_none());
    }

    #[test]
    fn test_stereo_interleaves_left_right() {
        let sync = Synchronizer::new(MixingPolicy::StereoChannels, 8, 8000);
        let mut inbound = buffer_with(&[10, 20, 30, 40]);
        let mut outbound = buffer_with(&[1, 2, 3, 4]);

        let chunk = sync.next_chunk(&mut inbound, &mut outbound).unwrap();

        assert_eq!(chunk.samples, vec![10, 1, 20, 2, 30, 3, 40, 4]);
        assert_eq!(chunk.channels, 2);
        assert_eq!(chunk.frames(), 4);
        assert_eq!(chunk.to_le_bytes().len(), 16);
    }

    #[test]
    fn test_no_step_until_both_tracks_have_a_chunk() {
        let sync = Synchronizer::new(MixingPolicy::StereoChannels, 4, 8000);
        let mut inbound = buffer_with(&[1, 2, 3, 4]);
        let mut outbound = buffer_with(&[9]);

        assert!(sync.next_chunk(&mut inbound, &mut outbound).is_none());
        assert_eq!(inbound.len(), 8);
        assert_eq!(outbound.len(), 2);
    }

    #[test]
    fn test_sum_mix_never_leaves_16_bit_range() {
        let scale = MAX_SUM_SCALE;
        let mut a = i16::MIN as i32;
        while a <= i16::MAX as i32 {
            let mut b = i16::MIN as i32;
            while b <= i16::MAX as i32 {
                let wide = attenuate(a as i16, scale) as i32 + attenuate(b as i16, scale) as i32;
                assert!(wide >= i16::MIN as i32 && wide <= i16::MAX as i32, "{} + {}", a, b);
                b += 257;
            }
            a += 257;
        }

        for &(a, b) in &[(i16::MAX, i16::MAX), (i16::MIN, i16::MIN), (i16::MIN, i16::MAX)] {
            let wide = attenuate(a, scale) as i32 + attenuate(b, scale) as i32;
            assert!(wide >= i16::MIN as i32 && wide <= i16::MAX as i32);
        }
    }

    #[test]
    fn test_sum_mix_rejects_clipping_scales() {
        assert_eq!(MixingPolicy::sum_mix(0.0), Err(PolicyError::ScaleOutOfRange(0.0)));
        assert!(MixingPolicy::sum_mix(0.75).is_err());
        assert!(MixingPolicy::sum_mix(f32::NAN).is_err());
        assert!(MixingPolicy::sum_mix(0.25).is_ok());
    }

    #[test]
    fn test_drain_pairs_common_then_zero_fills() {
        // Inbound 6 bytes, outbound 2 bytes, 2 byte chunks
        let sync = Synchronizer::new(MixingPolicy::StereoChannels, 2, 8000);
        let mut inbound = buffer_with(&[7, 8, 9]);
        let mut outbound = buffer_with(&[1]);

        let normal = sync.next_chunk(&mut inbound, &mut outbound).unwrap();
        assert_eq!(normal.samples, vec![7, 1]);
        assert!(sync.next_chunk(&mut inbound, &mut outbound).is_none());

        let mut drained = Vec::new();
        while let Some(chunk) = sync.next_drain_chunk(&mut inbound, &mut outbound) {
            drained.extend(chunk.samples);
        }

        assert_eq!(drained, vec![8, 0, 9, 0]);
        assert!(inbound.is_empty() && outbound.is_empty());
    }

    #[test]
    fn test_drain_pairs_partial_remainders() {
        let sync = Synchronizer::new(MixingPolicy::StereoChannels, 8, 8000);
        let mut inbound = buffer_with(&[1, 2, 3]);
        let mut outbound = buffer_with(&[4]);

        let first = sync.next_drain_chunk(&mut inbound, &mut outbound).unwrap();
        assert_eq!(first.samples, vec![1, 4]);

        let second = sync.next_drain_chunk(&mut inbound, &mut outbound).unwrap();
        assert_eq!(second.samples, vec![2, 0, 3, 0]);

        assert!(sync.next_drain_chunk(&mut inbound, &mut outbound).is_none());
    }

    #[test]
    fn test_drain_outbound_only_goes_right() {
        let sync = Synchronizer::new(MixingPolicy::StereoChannels, 4, 8000);
        let mut inbound = TrackBuffer::new();
        let mut outbound = buffer_with(&[5, 6, 7]);

        let first = sync.next_drain_chunk(&mut inbound, &mut outbound).unwrap();
        let second = sync.next_drain_chunk(&mut inbound, &mut outbound).unwrap();

        assert_eq!(first.samples, vec![0, 5, 0, 6]);
        assert_eq!(second.samples, vec![0, 7]);
    }

    #[test]
    fn test_alignment_holds_for_interleaved_appends() {
        let chunk_bytes = 6;
        let sync = Synchronizer::new(MixingPolicy::sum_mix(0.5).unwrap(), chunk_bytes, 8000);
        let mut inbound = TrackBuffer::new();
        let mut outbound = TrackBuffer::new();
        let (mut appended_in, mut appended_out) = (0usize, 0usize);

        // Deterministic pseudo-random arrival pattern
        let mut seed: u32 = 0x2545_f491;
        let (mut last_track, mut streak, mut longest_streak) = (2u32, 0u32, 0u32);
        for _ in 0..500 {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let samples = vec![1i16; ((seed >> 8) % 5 + 1) as usize];
            let track_bit = (seed >> 16) & 1;
            if track_bit == 0 {
                inbound.append(&samples);
                appended_in += samples.len() * SAMPLE_WIDTH;
            } else {
                outbound.append(&samples);
                appended_out += samples.len() * SAMPLE_WIDTH;
            }

            streak = if track_bit == last_track { streak + 1 } else { 1 };
            last_track = track_bit;
            longest_streak = longest_streak.max(streak);

            while sync.next_chunk(&mut inbound, &mut outbound).is_some() {
                let consumed_in = appended_in - inbound.len();
                let consumed_out = appended_out - outbound.len();
                assert_eq!(consumed_in, consumed_out);
                assert_eq!(consumed_in % chunk_bytes, 0);
            }
            assert!(inbound.len().min(outbound.len()) < chunk_bytes);
        }

        // One track must run ahead of the other for a while
        assert!(longest_streak >= 3);
    }
}
