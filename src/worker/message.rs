//! Control messages sent to the worker by its pages

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

/// Inbound control message, tagged by its `type` field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// `{"type":"CLEAR_CACHE"}`
    #[serde(rename = "CLEAR_CACHE")]
    ClearCache,
}

impl ControlMessage {
    /// Interpret a raw payload; unknown shapes yield `None`
    pub fn parse(data: &Value) -> Option<Self> {
        match serde_json::from_value(data.clone()) {
            Ok(msg) => Some(msg),
            Err(e) => {
                debug!(error = %e, "ignoring unrecognised message");
                None
            }
        }
    }
}

/// Acknowledgement for a cleared cache: `{"success":true}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearCacheReply {
    pub success: bool,
}

/// Reply channel handed over with a message
#[derive(Debug)]
pub struct ReplyPort {
    sender: oneshot::Sender<Value>,
}

impl ReplyPort {
    /// Create a port and the receiver the sender of the message listens on
    pub fn channel() -> (Self, oneshot::Receiver<Value>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }

    /// Post a reply; a receiver that has gone away is not an error
    pub fn post<T: Serialize>(self, reply: &T) {
        match serde_json::to_value(reply) {
            Ok(value) => {
                if self.sender.send(value).is_err() {
                    debug!("reply receiver dropped");
                }
            }
            Err(e) => debug!(error = %e, "reply not serialisable"),
        }
    }
}

/// A message event as delivered by the host
#[derive(Debug)]
pub struct MessageEvent {
    pub data: Value,
    pub reply: Option<ReplyPort>,
}
