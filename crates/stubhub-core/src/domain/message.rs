//! Messages exchanged on the bus.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::descriptor::MessageType;
use super::ids::ConnectionId;
use super::roster::ClientId;

/// One typed bus message. Params are opaque to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub mtype: MessageType,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Message {
    pub fn new(mtype: impl Into<MessageType>, params: serde_json::Value) -> Self {
        Self {
            mtype: mtype.into(),
            params,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.mtype, self.params)
    }
}

/// A message the bus delivered to one of the stub connections.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Connection the message was addressed to.
    pub recipient: ConnectionId,
    pub sender: ClientId,
    pub message: Message,
}
