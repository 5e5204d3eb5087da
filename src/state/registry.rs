//! Registry mapping logical client roles to live WebSocket channels.

use std::fmt;

use axum::extract::ws::Message;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Logical identity of a connected screen.
///
/// At most one live connection is retained per role; a new connection for
/// an occupied role replaces the old mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// First speaker.
    Player1,
    /// Second speaker.
    Player2,
    /// Left spectator display.
    Spectator1,
    /// Right spectator display.
    Spectator2,
    /// Operator control panel.
    Control,
}

impl Role {
    /// Parse a role from its URL path segment.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "player1" => Some(Role::Player1),
            "player2" => Some(Role::Player2),
            "spectator1" => Some(Role::Spectator1),
            "spectator2" => Some(Role::Spectator2),
            "control" => Some(Role::Control),
            _ => None,
        }
    }

    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Player1 => "player1",
            Role::Player2 => "player2",
            Role::Spectator1 => "spectator1",
            Role::Spectator2 => "spectator2",
            Role::Control => "control",
        }
    }

    /// Player number for the two speaker roles.
    pub fn player_number(self) -> Option<u8> {
        match self {
            Role::Player1 => Some(1),
            Role::Player2 => Some(2),
            _ => None,
        }
    }

    /// Speaker role for a player number.
    pub fn for_player(player: u8) -> Option<Role> {
        match player {
            1 => Some(Role::Player1),
            2 => Some(Role::Player2),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle used to push messages to one connected client.
///
/// The sender feeds the connection's dedicated writer task, so sends are
/// serialized per connection and independent across connections.
#[derive(Clone)]
pub struct ClientConnection {
    tx: mpsc::UnboundedSender<Message>,
}

/// Role-keyed map of live connections with best-effort fan-out.
#[derive(Default)]
pub struct ConnectionRegistry {
    clients: DashMap<Role, ClientConnection>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a role, replacing any previous one.
    pub fn register(&self, role: Role, tx: mpsc::UnboundedSender<Message>) {
        if self.clients.insert(role, ClientConnection { tx }).is_some() {
            debug!(%role, "replaced existing connection for role");
        }
    }

    /// Remove a role's connection, but only if it is still the one backed
    /// by `tx`. A disconnecting socket must not evict its replacement.
    pub fn unregister(&self, role: Role, tx: &mpsc::UnboundedSender<Message>) {
        self.clients
            .remove_if(&role, |_, conn| conn.tx.same_channel(tx));
    }

    /// Whether a role currently has a live connection.
    pub fn contains(&self, role: Role) -> bool {
        self.clients.contains_key(&role)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is connected.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Best-effort send to every registered connection. Connections that
    /// fail to accept the message are pruned after the iteration completes.
    pub fn broadcast<T: Serialize>(&self, payload: &T) {
        let Some(message) = encode(payload) else {
            return;
        };
        let mut dead: Vec<Role> = Vec::new();
        for entry in self.clients.iter() {
            if entry.value().tx.send(message.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for role in dead {
            warn!(%role, "pruning dead connection during broadcast");
            self.clients.remove(&role);
        }
    }

    /// Send to one role. No-op when the role is absent; a failed send
    /// unregisters that role.
    pub fn send_to<T: Serialize>(&self, role: Role, payload: &T) {
        let Some(message) = encode(payload) else {
            return;
        };
        let tx = match self.clients.get(&role) {
            Some(conn) => conn.tx.clone(),
            None => return,
        };
        if tx.send(message).is_err() {
            warn!(%role, "send failed, pruning connection");
            self.clients.remove(&role);
        }
    }
}

/// Serialize a payload into a text frame. Serialization failure is a bug in
/// the payload type, not the connection; log it and send nothing.
fn encode<T: Serialize>(payload: &T) -> Option<Message> {
    match serde_json::to_string(payload) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(err) => {
            warn!(error = %err, "failed to serialize outbound message");
            None
        }
    }
}
