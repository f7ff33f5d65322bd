//! Session Table
//!
//! Concurrent session registry keyed by session token, using DashMap.
//! The table exclusively owns each session's sending half, so destroying a
//! session is enough to close its channel.

use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use tokio::sync::oneshot;

use super::state::{SessionInfo, SessionState};
use crate::ipc::{PortError, PortSender};

/// Outcome of a best-effort delivery on a session channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Message handed to the channel
    Delivered,
    /// No session with that token (never created, or destroyed mid-flight)
    SessionNotFound,
    /// Session exists but no channel is attached yet
    NoChannel,
    /// The other end of the channel is gone
    ChannelClosed,
    /// The message could not be serialized
    Unserializable,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered => write!(f, "delivered"),
            Self::SessionNotFound => write!(f, "session-not-found"),
            Self::NoChannel => write!(f, "no-channel"),
            Self::ChannelClosed => write!(f, "channel-closed"),
            Self::Unserializable => write!(f, "unserializable"),
        }
    }
}

/// Session table shared by the control listener and the dispatcher
pub struct SessionTable {
    sessions: DashMap<String, SessionState>,
}

impl SessionTable {
    /// Create an empty session table
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Allocate an empty session record. A live session with the same token
    /// is replaced and its channel closed; returns whether that happened.
    pub fn create(&self, session_id: impl Into<String>) -> bool {
        let session_id = session_id.into();
        let previous = self
            .sessions
            .insert(session_id.clone(), SessionState::new(&session_id));

        match previous {
            Some(mut old) => {
                warn!("Session {} re-created, closing previous channel", session_id);
                old.close();
                true
            }
            None => {
                info!("Created session: {}", session_id);
                false
            }
        }
    }

    /// Bind a channel to an existing session. The returned receiver resolves
    /// when the session is closed.
    pub fn attach_channel(
        &self,
        session_id: &str,
        port: PortSender,
    ) -> Result<oneshot::Receiver<()>, SessionError> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;

        debug!("Attached channel to session {}", session_id);
        Ok(session.attach(port))
    }

    /// Get a session by token
    pub fn get(&self, session_id: &str) -> Result<Ref<'_, String, SessionState>, SessionError> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))
    }

    /// Close a session's channel and remove it. Unknown tokens are a no-op;
    /// returns whether a session was removed.
    pub fn destroy(&self, session_id: &str) -> bool {
        match self.sessions.remove(session_id) {
            Some((_, mut session)) => {
                session.close();
                info!("Destroyed session: {}", session_id);
                true
            }
            None => {
                debug!("Destroy for unknown session {}, nothing to do", session_id);
                false
            }
        }
    }

    /// Post a message on a session's channel
    pub fn post<T: Serialize + ?Sized>(&self, session_id: &str, message: &T) -> DeliveryOutcome {
        let Some(mut session) = self.sessions.get_mut(session_id) else {
            return DeliveryOutcome::SessionNotFound;
        };

        let result = match session.port() {
            Some(port) => port.post(message),
            None => return DeliveryOutcome::NoChannel,
        };

        match result {
            Ok(()) => {
                session.record_delivery();
                DeliveryOutcome::Delivered
            }
            Err(PortError::Closed) => DeliveryOutcome::ChannelClosed,
            Err(PortError::Serialization(_)) => DeliveryOutcome::Unserializable,
        }
    }

    /// Destroy every session - for shutdown
    pub fn destroy_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|s| s.key().clone()).collect();
        for id in ids {
            self.destroy(&id);
        }
    }

    /// Check if a session exists
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of all sessions
    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|s| SessionInfo::from(s.value()))
            .collect()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Session table errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::MessagePort;
    use serde_json::json;

    fn attached(table: &SessionTable, id: &str) -> (MessagePort, oneshot::Receiver<()>) {
        let (ours, theirs) = MessagePort::pair();
        let (sender, _receiver) = ours.split();
        table.create(id);
        let close_rx = table.attach_channel(id, sender).unwrap();
        (theirs, close_rx)
    }

    #[test]
    fn test_create_and_get() {
        let table = SessionTable::new();
        assert!(!table.create("s1"));
        assert!(table.contains("s1"));
        assert_eq!(table.get("s1").unwrap().id, "s1");
        assert!(matches!(table.get("s2"), Err(SessionError::SessionNotFound(_))));
    }

    #[test]
    fn test_attach_requires_session() {
        let table = SessionTable::new();
        let (ours, _theirs) = MessagePort::pair();
        let (sender, _receiver) = ours.split();
        assert!(matches!(
            table.attach_channel("missing", sender),
            Err(SessionError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_post_reaches_other_end() {
        let table = SessionTable::new();
        let (mut theirs, _close_rx) = attached(&table, "s1");

        assert_eq!(table.post("s1", &json!({"id": 1})), DeliveryOutcome::Delivered);
        assert_eq!(theirs.recv().await, Some(json!({"id": 1})));
        assert_eq!(table.get("s1").unwrap().replies_sent, 1);
    }

    #[test]
    fn test_post_outcomes() {
        let table = SessionTable::new();
        assert_eq!(table.post("nobody", &json!(1)), DeliveryOutcome::SessionNotFound);

        table.create("bare");
        assert_eq!(table.post("bare", &json!(1)), DeliveryOutcome::NoChannel);

        let (theirs, _close_rx) = attached(&table, "s1");
        drop(theirs);
        assert_eq!(table.post("s1", &json!(1)), DeliveryOutcome::ChannelClosed);
    }

    #[tokio::test]
    async fn test_destroy_closes_channel() {
        let table = SessionTable::new();
        let (mut theirs, close_rx) = attached(&table, "s1");

        assert!(table.destroy("s1"));
        assert!(!table.contains("s1"));
        assert!(close_rx.await.is_ok());
        assert_eq!(theirs.recv().await, None);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let table = SessionTable::new();
        assert!(!table.destroy("never-created"));

        table.create("s1");
        assert!(table.destroy("s1"));
        assert!(!table.destroy("s1"));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_recreate_closes_previous_channel() {
        let table = SessionTable::new();
        let (mut first, first_close) = attached(&table, "s1");

        assert!(table.create("s1"));
        assert!(first_close.await.is_ok());
        assert_eq!(first.recv().await, None);
        assert!(!table.get("s1").unwrap().has_channel());
    }

    #[test]
    fn test_destroy_all() {
        let table = SessionTable::new();
        table.create("a");
        table.create("b");
        assert_eq!(table.list().len(), 2);

        table.destroy_all();
        assert_eq!(table.len(), 0);
    }
}
