//! Coordination message envelope

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of a coordination message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Fetch a URL into the prefetch partition
    Prefetch,
    /// Fetch a document into the dynamic partition
    Prerender,
    /// Delete a URL from every partition
    Invalidate,
    /// Report cache statistics
    Stats,
    /// Refetch a URL and replace its cached copy
    Refresh,
    /// Run a cleanup sweep
    Cleanup,
    /// Unsolicited status broadcast
    Status,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Prefetch => "PREFETCH",
            MessageKind::Prerender => "PRERENDER",
            MessageKind::Invalidate => "INVALIDATE",
            MessageKind::Stats => "STATS",
            MessageKind::Refresh => "REFRESH",
            MessageKind::Cleanup => "CLEANUP",
            MessageKind::Status => "STATUS",
        };
        f.write_str(name)
    }
}

/// Correlated request/response envelope exchanged between the actors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationMessage {
    /// Unique per sender
    pub message_id: u64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: Value,
    /// Request this message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlates_to: Option<u64>,
    /// Outcome of the request this message answers
    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

impl CoordinationMessage {
    /// Request expecting a response
    pub fn request(message_id: u64, kind: MessageKind, payload: Value) -> Self {
        Self {
            message_id,
            kind,
            payload,
            correlates_to: None,
            success: true,
        }
    }

    /// Unsolicited status event
    pub fn status(message_id: u64, payload: Value) -> Self {
        Self::request(message_id, MessageKind::Status, payload)
    }

    /// Response to this message
    pub fn reply(&self, message_id: u64, success: bool, payload: Value) -> Self {
        Self {
            message_id,
            kind: self.kind,
            payload,
            correlates_to: Some(self.message_id),
            success,
        }
    }

    /// Check if the message answers a request
    pub fn is_response(&self) -> bool {
        self.correlates_to.is_some()
    }
}
