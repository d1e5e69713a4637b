//! Live websocket connections per user.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::debug;

struct Connection {
    id: u64,
    tx: UnboundedSender<String>,
}

/// User id → open connections. Each connection drains its receiver into
/// one websocket; a closed receiver marks the connection dead.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    users: Mutex<HashMap<String, Vec<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, user_id: &str) -> (u64, UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = unbounded_channel();
        if let Ok(mut users) = self.users.lock() {
            users.entry(user_id.to_string()).or_default().push(Connection { id, tx });
        }
        debug!(user_id, connection = id, "Websocket connected");
        (id, rx)
    }

    pub fn disconnect(&self, user_id: &str, connection_id: u64) {
        let Ok(mut users) = self.users.lock() else {
            return;
        };
        if let Some(connections) = users.get_mut(user_id) {
            connections.retain(|c| c.id != connection_id);
            if connections.is_empty() {
                users.remove(user_id);
            }
        }
        debug!(user_id, connection = connection_id, "Websocket disconnected");
    }

    /// Sends to every connection of `user_id`, pruning dead ones. Returns
    /// the number of live connections reached.
    pub fn send_to_user<T: Serialize>(&self, user_id: &str, message: &T) -> usize {
        let Ok(text) = serde_json::to_string(message) else {
            return 0;
        };
        let Ok(mut users) = self.users.lock() else {
            return 0;
        };
        deliver(&mut users, user_id, &text)
    }

    pub fn connection_count(&self, user_id: &str) -> usize {
        self.users
            .lock()
            .map(|users| users.get(user_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

fn deliver(users: &mut HashMap<String, Vec<Connection>>, user_id: &str, text: &str) -> usize {
    let Some(connections) = users.get_mut(user_id) else {
        return 0;
    };
    connections.retain(|c| c.tx.send(text.to_string()).is_ok());
    let reached = connections.len();
    if connections.is_empty() {
        users.remove(user_id);
    }
    reached
}
