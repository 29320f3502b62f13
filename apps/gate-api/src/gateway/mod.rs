//! Realtime gateway: connection handles, the connection registry, and the
//! WebSocket protocol that hands a login result to a waiting client.

pub mod connection;
pub mod events;
pub mod push;
pub mod registry;
pub mod server;
