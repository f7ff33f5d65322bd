//! Parent Port
//!
//! The control relationship with the host process. The host sends control
//! data together with an optional transferred session port; the sidecar
//! answers with plain signals.

use serde_json::Value;
use tokio::sync::mpsc;

use super::port::{channel, MessagePort, PortError, PortReceiver, PortSender};

/// One control event from the host
#[derive(Debug)]
pub struct HostEvent {
    /// Raw control message
    pub data: Value,
    /// Port transferred with the message, if any
    pub port: Option<MessagePort>,
}

impl HostEvent {
    pub fn new(data: Value) -> Self {
        Self { data, port: None }
    }

    pub fn with_port(data: Value, port: MessagePort) -> Self {
        Self {
            data,
            port: Some(port),
        }
    }
}

/// Sidecar end of the control channel
#[derive(Debug)]
pub struct ParentPort {
    pub events: mpsc::UnboundedReceiver<HostEvent>,
    pub outbound: PortSender,
}

/// Host end of the control channel
#[derive(Debug)]
pub struct HostHandle {
    events: mpsc::UnboundedSender<HostEvent>,
    inbound: PortReceiver,
}

impl HostHandle {
    /// Send a control event to the sidecar
    pub fn send(&self, event: HostEvent) -> Result<(), PortError> {
        self.events.send(event).map_err(|_| PortError::Closed)
    }

    /// Receive the next signal from the sidecar
    pub async fn recv(&mut self) -> Option<Value> {
        self.inbound.recv().await
    }

    /// Split into the event sender and the signal receiver
    pub fn split(self) -> (mpsc::UnboundedSender<HostEvent>, PortReceiver) {
        (self.events, self.inbound)
    }
}

/// Create a connected control channel
pub fn parent_channel() -> (ParentPort, HostHandle) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (outbound, inbound) = channel();

    (
        ParentPort {
            events: events_rx,
            outbound,
        },
        HostHandle {
            events: events_tx,
            inbound,
        },
    )
}
