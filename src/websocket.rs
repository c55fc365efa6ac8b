//! # Media Stream WebSocket Handler
//!
//! Telephony providers connect to `/ws/media` and push a call's audio as JSON
//! text frames. One WebSocket connection carries one call and owns one
//! bridging session.
//!
//! ## Media Stream Protocol:
//! 1. **connected**: protocol handshake, logged only
//! 2. **start**: stream and call identifiers, media format, custom parameters
//! 3. **media**: one base64 μ-law frame for the `inbound` or `outbound` track
//! 4. **stop**: end of the call; residual audio is drained
//!
//! `mark` and `dtmf` events are acknowledged in the log and otherwise ignored.
//!
//! ## Actor and Session Task:
//! The actor only parses frames and keeps the socket alive. Parsed events go
//! down an unbounded channel to the session task, which runs the mixing
//! pipeline and awaits the sink. The task outlives the actor, so a dropped
//! socket still drains and releases the sink. When the session finishes it
//! tells the actor, which closes the socket.

use crate::audio::buffer::Track;
use crate::audio::event::{CloseReason, MediaEvent, MediaFormat, SessionInput, StreamStart};
use crate::audio::session::{ConnectionSession, SessionEnd};
use crate::audio::sink::ConfiguredSink;
use crate::error::AppError;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Messages sent by the provider, discriminated by `event`.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamMessage {
    Connected {
        protocol: Option<String>,
        version: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: Option<String>,
        start: StartPayload,
    },
    Media {
        media: MediaPayload,
    },
    Stop {
        #[serde(rename = "streamSid")]
        stream_sid: Option<String>,
    },
    Mark {
        mark: Option<NamedPayload>,
    },
    Dtmf {
        dtmf: Option<DtmfPayload>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub stream_sid: Option<String>,
    pub account_sid: Option<String>,
    pub call_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
    pub media_format: Option<MediaFormatPayload>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormatPayload {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    /// Missing on single-track streams, which only carry inbound audio
    pub track: Option<String>,
    pub payload: String,
}

#[derive(Debug, Deserialize)]
pub struct NamedPayload {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DtmfPayload {
    pub digit: Option<String>,
}

/// Frames the transport cannot turn into a media event.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid media-stream message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown track label '{0}'")]
    UnknownTrack(String),
}

impl StreamMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Translate into a session event. Control-only events yield `None`.
    pub fn into_media_event(self) -> Result<Option<MediaEvent>, ProtocolError> {
        match self {
            StreamMessage::Start { stream_sid, start } => {
                let media_format = start.media_format.map(|format| MediaFormat {
                    encoding: format.encoding,
                    sample_rate: format.sample_rate,
                    channels: format.channels,
                });
                Ok(Some(MediaEvent::Start(StreamStart {
                    stream_sid: start.stream_sid.or(stream_sid),
                    account_sid: start.account_sid,
                    call_sid: start.call_sid,
                    tracks: start.tracks,
                    media_format,
                    custom_parameters: start.custom_parameters,
                })))
            }
            StreamMessage::Media { media } => {
                let label = media.track.as_deref().unwrap_or("inbound");
                let track = Track::from_label(label)
                    .ok_or_else(|| ProtocolError::UnknownTrack(label.to_string()))?;
                Ok(Some(MediaEvent::Media {
                    track,
                    payload: media.payload,
                }))
            }
            StreamMessage::Stop { .. } => Ok(Some(MediaEvent::Stop)),
            StreamMessage::Connected { .. }
            | StreamMessage::Mark { .. }
            | StreamMessage::Dtmf { .. }
            | StreamMessage::Unknown => Ok(None),
        }
    }
}

/// Sent by the session task once the session is closed.
#[derive(Message)]
#[rtype(result = "()")]
struct SessionEnded {
    end: SessionEnd,
}

/// WebSocket actor for one media-stream connection.
pub struct MediaStreamSocket {
    connection_id: Uuid,
    state: AppState,

    /// Moved into its own task when the actor starts
    session: Option<ConnectionSession<ConfiguredSink>>,

    /// Input side of the session task's channel
    events: Option<mpsc::UnboundedSender<SessionInput>>,

    started: bool,
    close_reason: Option<CloseReason>,

    heartbeat_interval: Duration,
    client_timeout: Duration,
    last_heartbeat: Instant,
}

impl MediaStreamSocket {
    pub fn new(
        connection_id: Uuid,
        state: AppState,
        session: ConnectionSession<ConfiguredSink>,
        heartbeat_interval: Duration,
        client_timeout: Duration,
    ) -> Self {
        Self {
            connection_id,
            state,
            session: Some(session),
            events: None,
            started: false,
            close_reason: None,
            heartbeat_interval,
            client_timeout,
            last_heartbeat: Instant::now(),
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(connection_id = %act.connection_id, "Media stream heartbeat timeout, closing connection");
                act.close_reason = Some(CloseReason::Abnormal("heartbeat timeout".to_string()));
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    /// Run the bridging session on its own task.
    fn spawn_session(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(session) = self.session.take() else {
            return;
        };

        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);

        let addr = ctx.address();
        let state = self.state.clone();
        let connection_id = self.connection_id;
        let span = info_span!("media_session", connection_id = %connection_id);

        actix_web::rt::spawn(
            async move {
                let summary = session.run(UnboundedReceiverStream::new(rx)).await;
                debug!(
                    stream_sid = ?summary.stream_sid,
                    call_sid = ?summary.call_sid,
                    stats = ?summary.stats,
                    "Session task finished"
                );

                state.registry.remove(&connection_id);
                state.record_session_finished(&summary);

                addr.do_send(SessionEnded { end: summary.end });
            }
            .instrument(span),
        );
    }

    fn forward(&self, input: SessionInput) {
        if let Some(events) = &self.events {
            if events.send(input).is_err() {
                debug!(connection_id = %self.connection_id, "Session already closed, dropping input");
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        let message = match StreamMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(connection_id = %self.connection_id, "Ignoring frame: {}", err);
                return;
            }
        };

        match &message {
            StreamMessage::Connected { protocol, version } => {
                info!(
                    connection_id = %self.connection_id,
                    protocol = protocol.as_deref().unwrap_or("unknown"),
                    version = version.as_deref().unwrap_or("unknown"),
                    "Media stream connected"
                );
            }
            StreamMessage::Mark { mark } => {
                debug!(name = ?mark.as_ref().and_then(|m| m.name.as_deref()), "Mark event ignored");
            }
            StreamMessage::Dtmf { dtmf } => {
                debug!(digit = ?dtmf.as_ref().and_then(|d| d.digit.as_deref()), "DTMF event ignored");
            }
            StreamMessage::Unknown => {
                debug!(connection_id = %self.connection_id, "Unknown media-stream event ignored");
            }
            StreamMessage::Stop { stream_sid } => {
                info!(
                    connection_id = %self.connection_id,
                    stream_sid = stream_sid.as_deref().unwrap_or("unknown"),
                    "Media stream stop received"
                );
            }
            StreamMessage::Start { .. } | StreamMessage::Media { .. } => {}
        }

        match message.into_media_event() {
            Ok(Some(event)) => {
                if let MediaEvent::Start(start) = &event {
                    if !self.started {
                        self.started = true;
                        self.state.registry.mark_streaming(
                            &self.connection_id,
                            start.stream_sid.clone(),
                            start.call_sid.clone(),
                        );
                    }
                }
                self.forward(SessionInput::Event(event));
            }
            Ok(None) => {}
            Err(ProtocolError::UnknownTrack(label)) => {
                warn!(connection_id = %self.connection_id, track = %label, "Dropping media frame with unknown track");
                self.state.record_unknown_track();
            }
            Err(err) => {
                warn!(connection_id = %self.connection_id, "Ignoring frame: {}", err);
            }
        }
    }
}

impl Actor for MediaStreamSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "Media stream connection opened");
        self.start_heartbeat(ctx);
        self.spawn_session(ctx);
    }

    /// The session task sees the disconnect and drains on its own.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let reason = self
            .close_reason
            .take()
            .unwrap_or_else(|| CloseReason::Abnormal("connection dropped".to_string()));
        info!(connection_id = %self.connection_id, reason = ?reason, "Media stream connection closed");

        self.forward(SessionInput::Disconnected(reason));
        self.events = None;
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for MediaStreamSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_text(&text);
            }
            Ok(ws::Message::Binary(data)) => {
                warn!(connection_id = %self.connection_id, bytes = data.len(), "Ignoring binary frame");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(connection_id = %self.connection_id, "Peer closed: {:?}", reason);
                self.close_reason = Some(CloseReason::Normal);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = %self.connection_id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.connection_id, "WebSocket protocol error: {}", err);
                self.close_reason = Some(CloseReason::Abnormal(err.to_string()));
                ctx.stop();
            }
        }
    }
}

impl Handler<SessionEnded> for MediaStreamSocket {
    type Result = ();

    fn handle(&mut self, msg: SessionEnded, ctx: &mut Self::Context) {
        let close = match &msg.end {
            SessionEnd::Failed(reason) => ws::CloseReason {
                code: ws::CloseCode::Error,
                description: Some(reason.clone()),
            },
            _ => ws::CloseReason::from(ws::CloseCode::Normal),
        };

        debug!(connection_id = %self.connection_id, end = ?msg.end, "Session finished, closing socket");
        self.events = None;
        if self.close_reason.is_none() {
            self.close_reason = Some(CloseReason::Normal);
        }
        ctx.close(Some(close));
        ctx.stop();
    }
}

/// Media stream endpoint handler.
///
/// Rejects the upgrade with 503 when `max_concurrent_sessions` streams are
/// already live. Audio settings are snapshotted here, so a later config update
/// never changes a call mid-stream.
pub async fn media_stream(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let config = app_state.get_config();
    let settings = config.audio.session_settings().map_err(AppError::from)?;
    let policy_name = settings.policy.name();

    let connection_id = app_state.registry.register(policy_name).map_err(|err| {
        warn!("Refusing media stream: {}", err);
        AppError::Unavailable(err)
    })?;

    info!(
        connection_id = %connection_id,
        peer = ?req.connection_info().peer_addr(),
        policy = policy_name,
        "Media stream upgrade"
    );

    let session = ConnectionSession::new(settings, ConfiguredSink::from_config(&config.sink));
    let socket = MediaStreamSocket::new(
        connection_id,
        app_state.get_ref().clone(),
        session,
        Duration::from_secs(config.performance.heartbeat_interval_secs),
        Duration::from_secs(config.performance.client_timeout_secs),
    );

    match ws::start(socket, &req, stream) {
        Ok(response) => {
            app_state.record_session_started();
            Ok(response)
        }
        Err(err) => {
            app_state.registry.remove(&connection_id);
            Err(err)
        }
    }
}
