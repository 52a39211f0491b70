//! Session Registry
//!
//! Tracks the live sessions of a server process. Sessions are created on
//! connection and torn down on disconnection; tearing one down drops its
//! entire graph (cells still held by application code keep working locally
//! but no longer drive anything).

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::output::OutputSink;

use super::{Session, SessionId};

/// Concurrent map of live sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for a new connection and track it.
    pub fn connect(&self, sink: Arc<dyn OutputSink>) -> Session {
        let session = Session::new(sink);
        self.sessions.insert(session.id(), session.clone());
        debug!(session = session.id().raw(), live = self.sessions.len(), "connected");
        session
    }

    /// Look up a live session.
    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Tear down a session. Returns false if it was not tracked.
    pub fn disconnect(&self, id: SessionId) -> bool {
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            debug!(session = id.raw(), live = self.sessions.len(), "disconnected");
        }
        removed
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
