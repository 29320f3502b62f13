//! Handle to one accepted WebSocket connection.

use tokio::sync::mpsc;

use super::events::ServerMessage;

/// Command queued for the socket task that owns the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(ServerMessage),
    Close { code: u16, reason: String },
}

/// Cloneable handle to a live connection.
///
/// The id is assigned once at accept time and identifies the connection
/// regardless of which key it is currently registered under. Sends never block.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: String,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: gate_common::prefixed_ulid(gate_common::id::prefix::CONNECTION),
            tx,
        };
        (handle, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a frame. Returns `false` if the connection is gone.
    pub fn send(&self, msg: ServerMessage) -> bool {
        self.tx.send(Outbound::Frame(msg)).is_ok()
    }

    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.tx.send(Outbound::Close {
            code,
            reason: reason.into(),
        });
    }

    /// Best-effort error frame followed by a close with the same code.
    pub fn terminate(&self, code: u16, reason: &str) {
        self.send(ServerMessage::error(code, reason));
        self.close(code, reason);
    }

    /// True once the socket task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
