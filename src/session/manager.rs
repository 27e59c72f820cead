//! Registry of independent sessions.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::{Session, SessionBuilder, SessionId};
use crate::Result;

/// Keys sessions by id. Sessions share nothing but this map.
#[derive(Clone, Debug, Default)]
pub struct SessionManager {
    sessions: Arc<DashMap<SessionId, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a session and registers it.
    pub fn create(&self, builder: SessionBuilder) -> Result<Session> {
        let session = builder.build()?;
        self.insert(session.clone());
        Ok(session)
    }

    pub fn insert(&self, session: Session) -> Option<Session> {
        debug!(session_id = %session.id(), "Session registered");
        self.sessions.insert(session.id(), session)
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
