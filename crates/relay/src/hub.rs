use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use axum::extract::ws::Message;
use shared::{domain::ConnectionId, protocol::RoutingHeader};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

pub(crate) type Outbound = mpsc::UnboundedSender<Message>;

struct Registration {
    id: ConnectionId,
    tx: Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ForwardOutcome {
    Delivered(String),
    NoDestination,
    UnknownDestination(String),
    Malformed,
    /// Ping, pong and close frames stay on their own connection.
    Control,
}

/// Name to connection registry. One live registration per name; the newest wins.
#[derive(Default)]
pub(crate) struct Hub {
    registry: Mutex<HashMap<String, Registration>>,
    next_id: AtomicU64,
}

impl Hub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the new connection id and whether a previous registration was replaced.
    ///
    /// The replaced connection is not closed; it just stops receiving forwarded frames.
    pub(crate) async fn register(&self, name: &str, tx: Outbound) -> (ConnectionId, bool) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let replaced = self
            .registry
            .lock()
            .await
            .insert(name.to_owned(), Registration { id, tx })
            .is_some();
        (id, replaced)
    }

    /// Removes `name` only while it still belongs to connection `id`.
    pub(crate) async fn deregister(&self, name: &str, id: ConnectionId) -> bool {
        let mut registry = self.registry.lock().await;
        match registry.get(name) {
            Some(registration) if registration.id == id => {
                registry.remove(name);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub(crate) async fn connection_id(&self, name: &str) -> Option<ConnectionId> {
        self.registry.lock().await.get(name).map(|r| r.id)
    }

    pub(crate) async fn len(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Sends `message` unchanged to the endpoint named by its `to` field.
    pub(crate) async fn forward(&self, message: Message) -> ForwardOutcome {
        let header = match &message {
            Message::Text(text) => RoutingHeader::parse(text.as_bytes()),
            Message::Binary(bytes) => RoutingHeader::parse(bytes),
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) => {
                return ForwardOutcome::Control
            }
        };
        let header = match header {
            Ok(header) => header,
            Err(err) => {
                warn!(%err, "dropping unroutable frame");
                return ForwardOutcome::Malformed;
            }
        };
        let Some(to) = header.to else {
            return ForwardOutcome::NoDestination;
        };

        let registry = self.registry.lock().await;
        let Some(registration) = registry.get(&to) else {
            debug!(to = %to, "destination not registered");
            return ForwardOutcome::UnknownDestination(to);
        };
        if registration.tx.send(message).is_err() {
            debug!(to = %to, connection_id = registration.id.0, "destination is closing");
            return ForwardOutcome::UnknownDestination(to);
        }
        ForwardOutcome::Delivered(to)
    }

    /// Asks every registered connection to close and empties the registry.
    pub(crate) async fn close_all(&self) {
        let mut registry = self.registry.lock().await;
        for (name, registration) in registry.drain() {
            info!(source = %name, connection_id = registration.id.0, "closing connection");
            let _ = registration.tx.send(Message::Close(None));
        }
    }
}

#[cfg(test)]
#[path = "tests/hub_tests.rs"]
mod tests;
