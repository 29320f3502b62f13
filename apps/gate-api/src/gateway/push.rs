//! Delivery of a freshly issued session token to the waiting connection.

use tracing::{info, warn};

use super::events::ServerMessage;
use super::registry::ConnectionRegistry;

/// What the callback hands to the gateway after a successful login.
#[derive(Debug, Clone)]
pub struct AuthPush {
    pub session_token: String,
    pub user_id: String,
    pub email: String,
    pub game_level: String,
}

/// Re-key the connection waiting under `ephemeral_key` to the user's id and
/// send it the token.
///
/// Returns `false` when no unauthenticated connection is waiting under that
/// key, which happens whenever the client disconnected mid-login.
pub fn push_auth_data(registry: &ConnectionRegistry, ephemeral_key: &str, push: AuthPush) -> bool {
    let Some(handle) = registry.re_key(ephemeral_key, &push.user_id, &push.game_level) else {
        warn!(%ephemeral_key, user_id = %push.user_id, "no waiting connection for auth push");
        return false;
    };

    let queued = handle.send(ServerMessage::AuthData {
        token: push.session_token,
        email: push.email,
    });
    info!(user_id = %push.user_id, connection_id = %handle.id(), queued, "auth data pushed");
    queued
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::connection::{ConnectionHandle, Outbound};

    fn push() -> AuthPush {
        AuthPush {
            session_token: "token".into(),
            user_id: "user-1".into(),
            email: "ada@example.com".into(),
            game_level: "Gold".into(),
        }
    }

    #[test]
    fn push_re_keys_and_sends_auth_data() {
        let registry = ConnectionRegistry::new();
        let (handle, mut rx) = ConnectionHandle::new();
        registry.register("abcdefghij", handle);

        assert!(push_auth_data(&registry, "abcdefghij", push()));
        assert!(registry.get("user-1").unwrap().authenticated);
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Frame(ServerMessage::AuthData {
                token: "token".into(),
                email: "ada@example.com".into()
            })
        );
    }

    #[test]
    fn push_without_waiting_connection_is_dropped() {
        let registry = ConnectionRegistry::new();
        assert!(!push_auth_data(&registry, "abcdefghij", push()));
        assert!(registry.is_empty());
    }
}
