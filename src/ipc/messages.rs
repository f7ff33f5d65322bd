//! Wire Messages
//!
//! Control messages exchanged with the host process and the request/reply
//! envelopes carried on session channels.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Argument key that carries the owning session token
pub const SESSION_ARG_KEY: &str = "sId";

/// Message sent by the host on the control channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Open a session (with a transferred port) or bootstrap (without one)
    Init {
        #[serde(
            rename = "sId",
            alias = "sessionId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        session_id: Option<String>,
    },

    /// Tear down a session
    Close {
        #[serde(rename = "sId", alias = "sessionId")]
        session_id: String,
    },

    /// Any other message type
    #[serde(other)]
    Unrecognized,
}

/// Message sent by the sidecar to the host on the control channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostSignal {
    /// Bootstrap finished
    Ready,
}

/// One RPC call on a session channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Caller-chosen id, echoed in the reply
    pub id: Value,
    /// Operation name
    pub name: String,
    /// Operation arguments; embeds the session token under `sId`
    #[serde(default)]
    pub args: Value,
}

impl RequestEnvelope {
    pub fn new(id: impl Into<Value>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    /// Session token embedded in the arguments, if any
    pub fn session_token(&self) -> Option<&str> {
        self.args.get(SESSION_ARG_KEY).and_then(Value::as_str)
    }
}

/// Reply discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyKind {
    Reply,
    Error,
}

/// Result of one RPC call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub id: Value,
    #[serde(rename = "type")]
    pub kind: ReplyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ReplyEnvelope {
    /// Successful reply carrying the handler's result
    pub fn success(id: Value, data: Value) -> Self {
        Self {
            id,
            kind: ReplyKind::Reply,
            data: Some(data),
            error: None,
            stack: None,
        }
    }

    /// Error reply
    pub fn failure(id: Value, error: impl Into<String>, stack: Option<String>) -> Self {
        Self {
            id,
            kind: ReplyKind::Error,
            data: None,
            error: Some(error.into()),
            stack,
        }
    }
}
