//! Wire events exchanged over a client connection.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//!
//! | Direction     | Event         | Data                  |
//! |---------------|---------------|-----------------------|
//! | client→server | `add-user`    | user id               |
//! | client→server | `send-msg`    | `{to, msg, from?}`    |
//! | server→client | `msg-recieve` | message body          |
//! | server→client | `superseded`  | user id               |

use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Bind this connection to a user identity.
    #[serde(rename = "add-user", alias = "identity-bind")]
    AddUser(UserId),

    /// Relay a direct message.
    #[serde(rename = "send-msg", alias = "message-send")]
    SendMessage(SendMessage),
}

/// Payload of a `send-msg` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    /// Recipient user id
    pub to: UserId,
    /// Message body
    pub msg: String,
    /// Sender as claimed by the client; the bound identity takes precedence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<UserId>,
}

impl ClientEvent {
    /// Parse a text frame.
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

/// Events the server pushes to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// A direct message addressed to this connection's user.
    // Wire name matches what deployed browser clients listen for.
    #[serde(rename = "msg-recieve", alias = "message-receive")]
    MessageReceive(String),

    /// Another connection has bound the user this connection was bound to.
    #[serde(rename = "superseded")]
    Superseded(UserId),
}

impl ServerEvent {
    /// Encode as a text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
