//! # Session Registry
//!
//! Process-wide table of live media-stream connections. It exists for two
//! things: enforcing the concurrent-session cap at upgrade time and answering
//! `GET /api/v1/sessions`. No audio passes through here; each session's
//! buffers stay owned by its own task.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Connection phase as seen from outside the session task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    AwaitingStart,
    Streaming,
}

/// Public description of one live connection.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub connection_id: Uuid,
    pub stream_sid: Option<String>,
    pub call_sid: Option<String>,
    pub phase: SessionPhase,
    /// Mixing policy name ("sum" or "stereo")
    pub policy: &'static str,
    pub connected_at: DateTime<Utc>,
}

/// Snapshot returned by the sessions endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub active: usize,
    pub max_sessions: usize,
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionInfo>>,
    max_sessions: RwLock<usize>,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions: RwLock::new(max_sessions),
        }
    }

    /// Claim a slot for a new connection.
    ///
    /// ## Returns:
    /// - **Ok(connection_id)**: the connection is registered as `AwaitingStart`
    /// - **Err(message)**: the concurrent-session cap is reached
    pub fn register(&self, policy: &'static str) -> Result<Uuid, String> {
        let max_sessions = *self.max_sessions.read().unwrap();
        let mut sessions = self.sessions.write().unwrap();

        if sessions.len() >= max_sessions {
            return Err(format!(
                "Maximum concurrent sessions ({}) reached",
                max_sessions
            ));
        }

        let connection_id = Uuid::new_v4();
        sessions.insert(
            connection_id,
            SessionInfo {
                connection_id,
                stream_sid: None,
                call_sid: None,
                phase: SessionPhase::AwaitingStart,
                policy,
                connected_at: Utc::now(),
            },
        );
        Ok(connection_id)
    }

    /// Record the identifiers from the start event.
    pub fn mark_streaming(
        &self,
        connection_id: &Uuid,
        stream_sid: Option<String>,
        call_sid: Option<String>,
    ) {
        let mut sessions = self.sessions.write().unwrap();
        if let Some(info) = sessions.get_mut(connection_id) {
            info.stream_sid = stream_sid;
            info.call_sid = call_sid;
            info.phase = SessionPhase::Streaming;
        }
    }

    /// Release a connection's slot. Returns false if it was not registered.
    pub fn remove(&self, connection_id: &Uuid) -> bool {
        self.sessions.write().unwrap().remove(connection_id).is_some()
    }

    pub fn get(&self, connection_id: &Uuid) -> Option<SessionInfo> {
        self.sessions.read().unwrap().get(connection_id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Change the cap; existing connections are never evicted.
    pub fn set_max_sessions(&self, max_sessions: usize) {
        *self.max_sessions.write().unwrap() = max_sessions;
    }

    /// All live sessions, oldest first.
    pub fn summary(&self) -> RegistrySummary {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.read().unwrap().values().cloned().collect();
        sessions.sort_by_key(|info| info.connected_at);

        RegistrySummary {
            active: sessions.len(),
            max_sessions: *self.max_sessions.read().unwrap(),
            sessions,
        }
    }
}
