//! Wire-format frames and close codes.

use serde::Serialize;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Close codes
// ---------------------------------------------------------------------------

/// Registration payload was missing or malformed.
pub const CLOSE_INVALID_REGISTRATION: u16 = 4000;
/// Another connection took over this connection's key.
pub const CLOSE_SUPERSEDED: u16 = 4001;
/// Membership was found inactive during revalidation.
pub const CLOSE_SUBSCRIPTION_EXPIRED: u16 = 4002;

/// Minimum length of a client-generated ephemeral key.
pub const MIN_TEMP_ID_LEN: usize = 10;

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A frame sent from the server to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Pong,
    AuthData { token: String, email: String },
    Authorization { status: String, access: String },
    Error { code: u16, message: String },
}

impl ServerMessage {
    /// Sent to a connection authenticated with a session token.
    pub fn authorized(game_level: &str) -> Self {
        ServerMessage::Authorization {
            status: "authorized".to_string(),
            access: game_level.to_string(),
        }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A frame received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `temp_id` is `None` when absent or not a string; validation is the caller's.
    Register { temp_id: Option<String> },
    Ping,
    Unknown(String),
}

/// The payload was not a JSON object with a string `type`.
#[derive(Debug, thiserror::Error)]
#[error("malformed client message: {0}")]
pub struct MalformedMessage(&'static str);

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, MalformedMessage> {
        let value: Value = serde_json::from_str(text).map_err(|_| MalformedMessage("not JSON"))?;
        let object = value.as_object().ok_or(MalformedMessage("not an object"))?;
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(MalformedMessage("missing string `type`"))?;

        Ok(match kind {
            "register" => ClientMessage::Register {
                temp_id: object.get("temp_id").and_then(Value::as_str).map(str::to_string),
            },
            "ping" => ClientMessage::Ping,
            other => ClientMessage::Unknown(other.to_string()),
        })
    }
}
