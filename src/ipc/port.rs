//! Message Ports
//!
//! Bidirectional channel endpoints. Ports are created in pairs: whatever one
//! end posts, the other end receives. A port can be split so that one task
//! owns the receiving half while the session table owns the sending half.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Channel errors
#[derive(Error, Debug)]
pub enum PortError {
    #[error("Port closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One end of a bidirectional message channel
#[derive(Debug)]
pub struct MessagePort {
    sender: PortSender,
    receiver: PortReceiver,
}

impl MessagePort {
    /// Create a connected pair of ports
    pub fn pair() -> (MessagePort, MessagePort) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();

        let left = MessagePort {
            sender: PortSender { tx: left_tx },
            receiver: PortReceiver { rx: right_rx },
        };
        let right = MessagePort {
            sender: PortSender { tx: right_tx },
            receiver: PortReceiver { rx: left_rx },
        };
        (left, right)
    }

    /// Post a message to the other end
    pub fn post<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), PortError> {
        self.sender.post(message)
    }

    /// Receive the next message; `None` once the other end is gone
    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    /// Split into independently owned halves
    pub fn split(self) -> (PortSender, PortReceiver) {
        (self.sender, self.receiver)
    }
}

/// Create a one-directional channel, for endpoints that only ever talk one way
pub fn channel() -> (PortSender, PortReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PortSender { tx }, PortReceiver { rx })
}

/// Sending half of a port
#[derive(Debug)]
pub struct PortSender {
    tx: mpsc::UnboundedSender<Value>,
}

impl PortSender {
    /// Serialize and post a message. Never blocks.
    pub fn post<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), PortError> {
        let value = serde_json::to_value(message)?;
        self.tx.send(value).map_err(|_| PortError::Closed)
    }
}

/// Receiving half of a port
#[derive(Debug)]
pub struct PortReceiver {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl PortReceiver {
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// Stop accepting messages; the other end's posts fail from now on
    pub fn close(&mut self) {
        self.rx.close();
    }
}
