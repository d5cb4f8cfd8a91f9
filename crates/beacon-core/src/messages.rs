use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ClientId;

/// Status code carried on every successful response.
pub const CODE_OK: u16 = 200;

const MSG_OK: &str = "success";

/// Inbound frame, client → hub.
///
/// `action` stays an open string: an unrecognized action must still parse so
/// that dispatch can log and ignore it without dropping the connection.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientRequest {
    pub action: String,
    #[serde(default)]
    pub channel: String,
    pub data: Option<Value>,
}

/// Outbound frame, hub → client. camelCase on the wire.
///
/// `clientId` is omitted on fan-out deliveries (they are not
/// address-specific); `channel` is omitted where it does not apply
/// (`connect`, `pong`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub code: u16,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ServerResponse {
    /// Sent once, immediately after admission, carrying the assigned identity.
    pub fn connected(client_id: &ClientId) -> Self {
        Self {
            client_id: Some(client_id.clone()),
            action: "connect".into(),
            channel: None,
            code: CODE_OK,
            msg: MSG_OK.into(),
            data: None,
        }
    }

    /// Success acknowledgment for a subscribe/unsubscribe request.
    pub fn ack(client_id: &ClientId, action: &str, channel: &str) -> Self {
        Self {
            client_id: Some(client_id.clone()),
            action: action.into(),
            channel: Some(channel.into()),
            code: CODE_OK,
            msg: MSG_OK.into(),
            data: None,
        }
    }

    pub fn pong(client_id: &ClientId) -> Self {
        Self {
            client_id: Some(client_id.clone()),
            action: "pong".into(),
            channel: None,
            code: CODE_OK,
            msg: MSG_OK.into(),
            data: None,
        }
    }

    /// Fan-out delivery to a channel's subscribers.
    pub fn broadcast(channel: &str, data: Option<Value>) -> Self {
        Self {
            client_id: None,
            action: "message".into(),
            channel: Some(channel.into()),
            code: CODE_OK,
            msg: MSG_OK.into(),
            data,
        }
    }
}

/// Fan-out request accepted by the broadcast intake, either from the
/// `POST /broadcast` control surface or from inside the process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub channel: String,
    pub data: Option<Value>,
}
