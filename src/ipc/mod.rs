//! IPC Module
//!
//! Channel plumbing between the sidecar, its host process and its callers:
//! - Message ports (bidirectional endpoints)
//! - The parent (control) channel
//! - Wire envelopes
//! - Process boundary bridging over stdio and TCP

pub mod messages;
pub mod parent;
pub mod port;
pub mod stdio;

pub use messages::{ControlMessage, HostSignal, ReplyEnvelope, ReplyKind, RequestEnvelope};
pub use parent::{parent_channel, HostEvent, HostHandle, ParentPort};
pub use port::{MessagePort, PortError, PortReceiver, PortSender};
