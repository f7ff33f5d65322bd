//! Session State
//!
//! Tracks the state of an individual caller session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::ipc::PortSender;

/// Complete state of a single session
#[derive(Debug)]
pub struct SessionState {
    /// Opaque token issued by the host
    pub id: String,
    /// Sending half of the session port, once attached
    port: Option<PortSender>,
    /// Stops the session's request listener when fired or dropped
    close_tx: Option<oneshot::Sender<()>>,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When a reply was last delivered
    pub last_activity: DateTime<Utc>,
    /// Replies delivered on this session
    pub replies_sent: u64,
}

impl SessionState {
    /// Create an empty session with no channel attached
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            port: None,
            close_tx: None,
            created_at: now,
            last_activity: now,
            replies_sent: 0,
        }
    }

    /// Bind the session's channel; returns the listener's close signal
    pub(crate) fn attach(&mut self, port: PortSender) -> oneshot::Receiver<()> {
        let (close_tx, close_rx) = oneshot::channel();
        self.port = Some(port);
        self.close_tx = Some(close_tx);
        close_rx
    }

    pub fn port(&self) -> Option<&PortSender> {
        self.port.as_ref()
    }

    pub fn has_channel(&self) -> bool {
        self.port.is_some()
    }

    pub(crate) fn record_delivery(&mut self) {
        self.replies_sent += 1;
        self.last_activity = Utc::now();
    }

    /// Release the channel and stop the request listener
    pub fn close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
        self.port = None;
    }
}

/// Serializable session info
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub has_channel: bool,
    pub created_at: String,
    pub last_activity: String,
    pub replies_sent: u64,
}

impl From<&SessionState> for SessionInfo {
    fn from(state: &SessionState) -> Self {
        Self {
            id: state.id.clone(),
            has_channel: state.has_channel(),
            created_at: state.created_at.to_rfc3339(),
            last_activity: state.last_activity.to_rfc3339(),
            replies_sent: state.replies_sent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::MessagePort;

    #[test]
    fn test_new_session_has_no_channel() {
        let state = SessionState::new("s1");
        assert_eq!(state.id, "s1");
        assert!(!state.has_channel());
        assert_eq!(state.replies_sent, 0);
    }

    #[tokio::test]
    async fn test_close_fires_signal_and_releases_port() {
        let (ours, _theirs) = MessagePort::pair();
        let (sender, _receiver) = ours.split();

        let mut state = SessionState::new("s1");
        let close_rx = state.attach(sender);
        assert!(state.has_channel());

        state.close();
        assert!(!state.has_channel());
        assert!(close_rx.await.is_ok());
    }
}
