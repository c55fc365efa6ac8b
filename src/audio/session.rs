//! # Bridging Session
//!
//! One [`ConnectionSession`] owns everything needed to bridge a single call:
//! the two track buffers, the synchronizer with its fixed mixing policy and
//! the audio sink. It consumes [`SessionInput`]s strictly in arrival order.
//!
//! ## Session Lifecycle:
//! 1. **AwaitingStart**: only a start event is accepted, anything else is
//!    logged and ignored
//! 2. **Streaming**: media frames are decoded, buffered per track and mixed
//!    whenever both tracks hold a full chunk
//! 3. **Closed**: terminal; residual audio has been drained and the sink
//!    released
//!
//! ## Shutdown Guarantees:
//! Stop, disconnect and the end of the event stream all funnel into the same
//! close path, which runs at most once. A second stop or a disconnect after
//! stop changes nothing.

use crate::audio::buffer::{Track, TrackBuffer};
use crate::audio::codec::FrameDecoder;
use crate::audio::event::{CloseReason, MediaEvent, SessionInput, StreamStart, MULAW_ENCODING};
use crate::audio::mixer::{MixingPolicy, Synchronizer};
use crate::audio::sink::{AudioSink, SinkError};
use crate::config::OverflowPolicy;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Per-session parameters, fixed when the session is created.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub policy: MixingPolicy,
    /// Bytes required from each track before a mix step
    pub chunk_bytes: usize,
    pub sample_rate: u32,
    pub max_frame_bytes: usize,
    /// High-water mark for a single track buffer; `None` means unbounded
    pub buffer_limit: Option<BufferLimit>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferLimit {
    pub max_bytes: usize,
    pub policy: OverflowPolicy,
}

/// Position in the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingStart,
    Streaming,
    Closed,
}

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("audio sink failed: {0}")]
    Sink(#[from] SinkError),

    #[error("{track} buffer exceeded {limit} bytes")]
    BufferOverflow { track: Track, limit: usize },
}

/// Why a session reached `Closed`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    /// The provider sent a stop event
    Stopped,
    /// The connection went away first
    Disconnected(CloseReason),
    /// A session-fatal error
    Failed(String),
}

impl SessionEnd {
    pub fn is_failure(&self) -> bool {
        matches!(self, SessionEnd::Failed(_))
    }
}

/// Counters collected over the life of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub chunks_emitted: u64,
    /// Chunks produced by draining at close
    pub drained_chunks: u64,
    /// Bytes dropped by the overflow policy
    pub bytes_discarded: u64,
}

/// Terminal result of [`ConnectionSession::run`].
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub stream_sid: Option<String>,
    pub call_sid: Option<String>,
    pub end: SessionEnd,
    pub stats: SessionStats,
}

/// Per-connection bridging state.
pub struct ConnectionSession<S: AudioSink> {
    state: SessionState,
    decoder: FrameDecoder,
    synchronizer: Synchronizer,
    inbound: TrackBuffer,
    outbound: TrackBuffer,
    buffer_limit: Option<BufferLimit>,
    sink: S,
    sink_open: bool,
    start: Option<StreamStart>,
    stats: SessionStats,
    end: Option<SessionEnd>,
}

impl<S: AudioSink> ConnectionSession<S> {
    pub fn new(settings: SessionSettings, sink: S) -> Self {
        Self {
            state: SessionState::AwaitingStart,
            decoder: FrameDecoder::new(settings.max_frame_bytes),
            synchronizer: Synchronizer::new(settings.policy, settings.chunk_bytes, settings.sample_rate),
            inbound: TrackBuffer::new(),
            outbound: TrackBuffer::new(),
            buffer_limit: settings.buffer_limit,
            sink,
            sink_open: false,
            start: None,
            stats: SessionStats::default(),
            end: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Bytes currently buffered for a track.
    pub fn buffered(&self, track: Track) -> usize {
        match track {
            Track::Inbound => self.inbound.len(),
            Track::Outbound => self.outbound.len(),
        }
    }

    /// Consume events until the session closes or the stream ends.
    ///
    /// The end of the stream without a stop event counts as an abnormal
    /// disconnect, so residual audio is still drained and the sink released.
    pub async fn run<E>(mut self, mut events: E) -> SessionSummary
    where
        E: Stream<Item = SessionInput> + Unpin,
    {
        while let Some(input) = events.next().await {
            if let Err(err) = self.handle(input).await {
                error!("Session ended with error: {}", err);
            }
            if self.state == SessionState::Closed {
                break;
            }
        }

        if self.state != SessionState::Closed {
            self.close(SessionEnd::Disconnected(CloseReason::Abnormal(
                "event stream ended".to_string(),
            )))
            .await;
        }

        self.summary()
    }

    /// Process a single input.
    ///
    /// Per-frame problems are absorbed here. An `Err` means the session hit a
    /// fatal error and has already moved to `Closed` with the sink released.
    pub async fn handle(&mut self, input: SessionInput) -> Result<(), SessionError> {
        match (self.state, input) {
            (SessionState::Closed, input) => {
                debug!("Ignoring {} after session close", input_kind(&input));
                Ok(())
            }
            (_, SessionInput::Disconnected(reason)) => {
                self.close(SessionEnd::Disconnected(reason)).await;
                Ok(())
            }
            (SessionState::AwaitingStart, SessionInput::Event(MediaEvent::Start(start))) => {
                self.begin(start).await
            }
            (SessionState::AwaitingStart, SessionInput::Event(event)) => {
                warn!("Ignoring {} event before stream start", event_kind(&event));
                Ok(())
            }
            (SessionState::Streaming, SessionInput::Event(MediaEvent::Start(_))) => {
                warn!("Ignoring duplicate start event");
                Ok(())
            }
            (SessionState::Streaming, SessionInput::Event(MediaEvent::Media { track, payload })) => {
                match self.on_media(track, &payload).await {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        self.abort(&err).await;
                        Err(err)
                    }
                }
            }
            (SessionState::Streaming, SessionInput::Event(MediaEvent::Stop)) => {
                self.close(SessionEnd::Stopped).await;
                Ok(())
            }
        }
    }

    /// AwaitingStart → Streaming: acquire the sink.
    async fn begin(&mut self, start: StreamStart) -> Result<(), SessionError> {
        if let Some(format) = &start.media_format {
            if format.encoding != MULAW_ENCODING {
                warn!(encoding = %format.encoding, "Stream announced a non μ-law encoding, decoding as μ-law");
            }
            let expected_rate = self.synchronizer.output_format().sample_rate;
            if format.sample_rate != expected_rate {
                warn!(
                    announced = format.sample_rate,
                    expected = expected_rate,
                    "Stream sample rate differs from configuration"
                );
            }
            if format.channels != 1 {
                warn!(channels = format.channels, "Stream announced multi-channel media, expected mono per track");
            }
        }

        let format = self.synchronizer.output_format();
        if let Err(err) = self.sink.open(format, &start).await {
            self.start = Some(start);
            let err = SessionError::from(err);
            self.finish(SessionEnd::Failed(err.to_string())).await;
            return Err(err);
        }

        info!(
            stream_sid = start.stream_sid.as_deref().unwrap_or("unknown"),
            call_sid = start.call_sid.as_deref().unwrap_or("unknown"),
            tracks = ?start.tracks,
            policy = self.synchronizer.policy().name(),
            chunk_bytes = self.synchronizer.chunk_bytes(),
            "Media stream started"
        );

        self.sink_open = true;
        self.start = Some(start);
        self.state = SessionState::Streaming;
        Ok(())
    }

    async fn on_media(&mut self, track: Track, payload: &str) -> Result<(), SessionError> {
        let samples = match self.decoder.decode(payload) {
            Ok(samples) => samples,
            Err(err) => {
                self.stats.frames_dropped += 1;
                warn!(track = %track, "Dropping media frame: {}", err);
                return Ok(());
            }
        };

        self.stats.frames_decoded += 1;
        match track {
            Track::Inbound => self.inbound.append(&samples),
            Track::Outbound => self.outbound.append(&samples),
        }
        trace!(
            track = %track,
            inbound = self.inbound.len(),
            outbound = self.outbound.len(),
            "Frame buffered"
        );

        self.mix_ready().await?;
        self.enforce_limit(track)
    }

    /// Emit every full aligned chunk currently available.
    async fn mix_ready(&mut self) -> Result<(), SinkError> {
        while let Some(chunk) = self
            .synchronizer
            .next_chunk(&mut self.inbound, &mut self.outbound)
        {
            self.sink.write(&chunk).await?;
            self.stats.chunks_emitted += 1;
        }
        Ok(())
    }

    fn enforce_limit(&mut self, track: Track) -> Result<(), SessionError> {
        let Some(limit) = self.buffer_limit else {
            return Ok(());
        };

        let buffer = match track {
            Track::Inbound => &mut self.inbound,
            Track::Outbound => &mut self.outbound,
        };
        if buffer.len() <= limit.max_bytes {
            return Ok(());
        }

        match limit.policy {
            OverflowPolicy::DropOldest => {
                let dropped = buffer.discard_front(buffer.len() - limit.max_bytes);
                self.stats.bytes_discarded += dropped as u64;
                warn!(track = %track, dropped, "Track buffer over limit, dropped oldest audio");
                Ok(())
            }
            OverflowPolicy::Disconnect => Err(SessionError::BufferOverflow {
                track,
                limit: limit.max_bytes,
            }),
        }
    }

    /// Close after a fatal error.
    ///
    /// A broken sink cannot take the drained tail, so buffered audio is
    /// discarded. An overflow still drains normally.
    async fn abort(&mut self, err: &SessionError) {
        match err {
            SessionError::Sink(_) => {
                self.inbound.drain_all();
                self.outbound.drain_all();
                self.finish(SessionEnd::Failed(err.to_string())).await;
            }
            SessionError::BufferOverflow { .. } => {
                self.close(SessionEnd::Failed(err.to_string())).await;
            }
        }
    }

    /// Drain residual audio, then release everything. Runs at most once.
    async fn close(&mut self, end: SessionEnd) {
        if self.state == SessionState::Closed {
            return;
        }

        let mut end = end;
        if self.state == SessionState::Streaming {
            while let Some(chunk) = self
                .synchronizer
                .next_drain_chunk(&mut self.inbound, &mut self.outbound)
            {
                if let Err(err) = self.sink.write(&chunk).await {
                    warn!("Sink failed while draining: {}", err);
                    self.inbound.drain_all();
                    self.outbound.drain_all();
                    end = SessionEnd::Failed(SessionError::from(err).to_string());
                    break;
                }
                self.stats.chunks_emitted += 1;
                self.stats.drained_chunks += 1;
            }
        }

        self.finish(end).await;
    }

    /// Release the sink and enter `Closed`.
    async fn finish(&mut self, end: SessionEnd) {
        if self.sink_open {
            self.sink.close().await;
            self.sink_open = false;
        }

        info!(
            end = ?end,
            frames_decoded = self.stats.frames_decoded,
            frames_dropped = self.stats.frames_dropped,
            chunks_emitted = self.stats.chunks_emitted,
            "Media session closed"
        );

        self.state = SessionState::Closed;
        self.end = Some(end);
    }

    fn summary(self) -> SessionSummary {
        let start = self.start.unwrap_or_default();
        SessionSummary {
            stream_sid: start.stream_sid,
            call_sid: start.call_sid,
            end: self.end.unwrap_or(SessionEnd::Disconnected(CloseReason::Normal)),
            stats: self.stats,
        }
    }
}

fn event_kind(event: &MediaEvent) -> &'static str {
    match event {
        MediaEvent::Start(_) => "start",
        MediaEvent::Media { .. } => "media",
        MediaEvent::Stop => "stop",
    }
}

fn input_kind(input: &SessionInput) -> &'static str {
    match input {
        SessionInput::Event(event) => event_kind(event),
        SessionInput::Disconnected(_) => "disconnect",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mixer::{MixedChunk, OutputFormat};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::sync::{Arc, Mutex};

    /// What the test sink saw.
    #[derive(Debug, Default)]
    struct Recorded {
        opened: u32,
        closed: u32,
        chunks: Vec<MixedChunk>,
    }

    /// In-memory sink that can be told to fail.
    #[derive(Clone, Default)]
    struct RecordingSink {
        recorded: Arc<Mutex<Recorded>>,
        fail_open: bool,
        fail_after_writes: Option<usize>,
    }

    impl AudioSink for RecordingSink {
        async fn open(&mut self, _format: OutputFormat, _start: &StreamStart) -> Result<(), SinkError> {
            if self.fail_open {
                return Err(SinkError::NoTarget);
            }
            self.recorded.lock().unwrap().opened += 1;
            Ok(())
        }

        async fn write(&mut self, chunk: &MixedChunk) -> Result<(), SinkError> {
            let mut recorded = self.recorded.lock().unwrap();
            if let Some(limit) = self.fail_after_writes {
                if recorded.chunks.len() >= limit {
                    return Err(SinkError::NotOpen);
                }
            }
            recorded.chunks.push(chunk.clone());
            Ok(())
        }

        async fn close(&mut self) {
            self.recorded.lock().unwrap().closed += 1;
        }
    }

    fn settings(policy: MixingPolicy, chunk_bytes: usize) -> SessionSettings {
        SessionSettings {
            policy,
            chunk_bytes,
            sample_rate: 8000,
            max_frame_bytes: 1024,
            buffer_limit: None,
        }
    }

    fn start() -> SessionInput {
        SessionInput::Event(MediaEvent::Start(StreamStart {
            stream_sid: Some("MZ1".to_string()),
            call_sid: Some("CA1".to_string()),
            ..Default::default()
        }))
    }

    fn media(track: Track, mulaw: &[u8]) -> SessionInput {
        SessionInput::Event(MediaEvent::Media {
            track,
            payload: STANDARD.encode(mulaw),
        })
    }

    fn stop() -> SessionInput {
        SessionInput::Event(MediaEvent::Stop)
    }

    // μ-law bytes with known linear values
    const ZERO: u8 = 0xff;
    const POS_132: u8 = 0xef;
    const NEG_132: u8 = 0x6f;
    const POS_1052: u8 = 0xcd;

    #[tokio::test]
    async fn test_stereo_session_mixes_aligned_chunks() {
        let sink = RecordingSink::default();
        let recorded = sink.recorded.clone();
        let mut session = ConnectionSession::new(settings(MixingPolicy::StereoChannels, 4), sink);

        session.handle(start()).await.unwrap();
        session.handle(media(Track::Inbound, &[POS_132, POS_1052])).await.unwrap();
        assert!(recorded.lock().unwrap().chunks.is_empty());

        session.handle(media(Track::Outbound, &[NEG_132, ZERO])).await.unwrap();

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.opened, 1);
        assert_eq!(recorded.chunks.len(), 1);
        assert_eq!(recorded.chunks[0].samples, vec![132, -132, 1052, 0]);
        assert_eq!(session.buffered(Track::Inbound), 0);
        assert_eq!(session.buffered(Track::Outbound), 0);
    }

    #[tokio::test]
    async fn test_sum_session_attenuates() {
        let sink = RecordingSink::default();
        let recorded = sink.recorded.clone();
        let policy = MixingPolicy::sum_mix(0.5).unwrap();
        let mut session = ConnectionSession::new(settings(policy, 4), sink);

        session.handle(start()).await.unwrap();
        session.handle(media(Track::Inbound, &[POS_132, POS_1052])).await.unwrap();
        session.handle(media(Track::Outbound, &[POS_132, NEG_132])).await.unwrap();

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.chunks[0].samples, vec![66 + 66, 526 - 66]);
        assert_eq!(recorded.chunks[0].channels, 1);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let sink = RecordingSink::default();
        let recorded = sink.recorded.clone();
        let mut session = ConnectionSession::new(settings(MixingPolicy::StereoChannels, 2), sink);

        session.handle(start()).await.unwrap();
        session.handle(media(Track::Inbound, &[POS_132])).await.unwrap();
        session
            .handle(SessionInput::Event(MediaEvent::Media {
                track: Track::Inbound,
                payload: "%%% not base64 %%%".to_string(),
            }))
            .await
            .unwrap();
        session.handle(media(Track::Inbound, &[NEG_132])).await.unwrap();
        session.handle(media(Track::Inbound, &[ZERO])).await.unwrap();
        for _ in 0..3 {
            session.handle(media(Track::Outbound, &[ZERO])).await.unwrap();
        }

        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.stats().frames_decoded, 6);
        assert_eq!(session.stats().frames_dropped, 1);

        let recorded = recorded.lock().unwrap();
        let left: Vec<i16> = recorded.chunks.iter().map(|c| c.samples[0]).collect();
        assert_eq!(left, vec![132, -132, 0]);
    }

    #[tokio::test]
    async fn test_events_before_start_are_ignored() {
        let sink = RecordingSink::default();
        let recorded = sink.recorded.clone();
        let mut session = ConnectionSession::new(settings(MixingPolicy::StereoChannels, 2), sink);

        session.handle(media(Track::Inbound, &[POS_132])).await.unwrap();
        session.handle(stop()).await.unwrap();

        assert_eq!(session.state(), SessionState::AwaitingStart);
        assert_eq!(session.buffered(Track::Inbound), 0);
        assert_eq!(recorded.lock().unwrap().opened, 0);
    }

    #[tokio::test]
    async fn test_stop_drains_residual_audio() {
        // Inbound 6 bytes, outbound 2 bytes, 2 byte chunks
        let sink = RecordingSink::default();
        let recorded = sink.recorded.clone();
        let mut session = ConnectionSession::new(settings(MixingPolicy::StereoChannels, 2), sink);

        session.handle(start()).await.unwrap();
        session.handle(media(Track::Inbound, &[POS_132, NEG_132, POS_1052])).await.unwrap();
        session.handle(media(Track::Outbound, &[POS_132])).await.unwrap();
        assert_eq!(recorded.lock().unwrap().chunks.len(), 1);

        session.handle(stop()).await.unwrap();

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.buffered(Track::Inbound), 0);
        assert_eq!(session.buffered(Track::Outbound), 0);
        assert_eq!(session.stats().drained_chunks, 2);

        let recorded = recorded.lock().unwrap();
        let all: Vec<i16> = recorded.chunks.iter().flat_map(|c| c.samples.clone()).collect();
        assert_eq!(all, vec![132, 132, -132, 0, 1052, 0]);
        assert_eq!(recorded.closed, 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let sink = RecordingSink::default();
        let recorded = sink.recorded.clone();
        let mut session = ConnectionSession::new(settings(MixingPolicy::StereoChannels, 4), sink);

        session.handle(start()).await.unwrap();
        session.handle(media(Track::Inbound, &[POS_132])).await.unwrap();
        session.handle(stop()).await.unwrap();
        session.handle(stop()).await.unwrap();
        session
            .handle(SessionInput::Disconnected(CloseReason::Normal))
            .await
            .unwrap();

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.closed, 1);
        assert_eq!(recorded.chunks.len(), 1);
        assert_eq!(recorded.chunks[0].samples, vec![132, 0]);
    }

    #[tokio::test]
    async fn test_sink_failure_closes_session() {
        let sink = RecordingSink {
            fail_after_writes: Some(0),
            ..Default::default()
        };
        let recorded = sink.recorded.clone();
        let mut session = ConnectionSession::new(settings(MixingPolicy::StereoChannels, 2), sink);

        session.handle(start()).await.unwrap();
        session.handle(media(Track::Inbound, &[POS_132])).await.unwrap();
        let result = session.handle(media(Track::Outbound, &[POS_132])).await;

        assert!(matches!(result, Err(SessionError::Sink(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.buffered(Track::Inbound), 0);

        // Further events are no-ops
        session.handle(stop()).await.unwrap();
        assert_eq!(recorded.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn test_sink_open_failure_is_fatal() {
        let sink = RecordingSink {
            fail_open: true,
            ..Default::default()
        };
        let recorded = sink.recorded.clone();
        let mut session = ConnectionSession::new(settings(MixingPolicy::StereoChannels, 2), sink);

        assert!(session.handle(start()).await.is_err());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(recorded.lock().unwrap().closed, 0);
    }

    #[tokio::test]
    async fn test_run_drains_when_stream_ends_without_stop() {
        let sink = RecordingSink::default();
        let recorded = sink.recorded.clone();
        let session = ConnectionSession::new(settings(MixingPolicy::StereoChannels, 4), sink);

        let events = futures_util::stream::iter(vec![
            start(),
            media(Track::Outbound, &[POS_1052, POS_132, NEG_132]),
            media(Track::Inbound, &[ZERO, ZERO]),
        ]);
        let summary = session.run(events).await;

        assert_eq!(summary.stream_sid.as_deref(), Some("MZ1"));
        assert!(matches!(
            summary.end,
            SessionEnd::Disconnected(CloseReason::Abnormal(_))
        ));
        assert_eq!(summary.stats.chunks_emitted, 2);
        assert_eq!(summary.stats.drained_chunks, 1);

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.chunks[1].samples, vec![0, -132]);
        assert_eq!(recorded.closed, 1);
    }

    #[tokio::test]
    async fn test_run_stops_consuming_after_stop() {
        let sink = RecordingSink::default();
        let recorded = sink.recorded.clone();
        let session = ConnectionSession::new(settings(MixingPolicy::StereoChannels, 2), sink);

        let events = futures_util::stream::iter(vec![
            start(),
            stop(),
            media(Track::Inbound, &[POS_132]),
            SessionInput::Disconnected(CloseReason::Normal),
        ]);
        let summary = session.run(events).await;

        assert_eq!(summary.end, SessionEnd::Stopped);
        assert!(recorded.lock().unwrap().chunks.is_empty());
        assert_eq!(recorded.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn test_overflow_drop_oldest_caps_buffer() {
        let sink = RecordingSink::default();
        let mut config = settings(MixingPolicy::StereoChannels, 2);
        config.buffer_limit = Some(BufferLimit {
            max_bytes: 4,
            policy: OverflowPolicy::DropOldest,
        });
        let mut session = ConnectionSession::new(config, sink);

        session.handle(start()).await.unwrap();
        session.handle(media(Track::Inbound, &[POS_132, NEG_132])).await.unwrap();
        session.handle(media(Track::Inbound, &[POS_1052])).await.unwrap();

        assert_eq!(session.buffered(Track::Inbound), 4);
        assert_eq!(session.stats().bytes_discarded, 2);
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[tokio::test]
    async fn test_overflow_disconnect_ends_session_with_drain() {
        let sink = RecordingSink::default();
        let recorded = sink.recorded.clone();
        let mut config = settings(MixingPolicy::StereoChannels, 2);
        config.buffer_limit = Some(BufferLimit {
            max_bytes: 2,
            policy: OverflowPolicy::Disconnect,
        });
        let mut session = ConnectionSession::new(config, sink);

        session.handle(start()).await.unwrap();
        let result = session.handle(media(Track::Inbound, &[POS_132, NEG_132])).await;

        assert!(matches!(
            result,
            Err(SessionError::BufferOverflow { track: Track::Inbound, limit: 2 })
        ));
        assert_eq!(session.state(), SessionState::Closed);

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.chunks.len(), 2);
        assert_eq!(recorded.closed, 1);
    }
}
