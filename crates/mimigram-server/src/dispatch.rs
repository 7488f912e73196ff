//! Real-time dispatcher.
//!
//! Holds the sending half of every live socket and pushes [`ServerEvent`]s to
//! users through the [`PresenceRegistry`]. Delivery is fire-and-forget: an
//! offline target, or a socket that went away between lookup and send, is
//! silently skipped. Nothing is queued or retried.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, trace};

use mimigram_shared::{ChatId, ConnectionId, UserId};

use crate::events::{ServerEvent, TypingNotice, UserStatus};
use crate::presence::PresenceRegistry;

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

pub struct Dispatcher {
    presence: Arc<PresenceRegistry>,
    connections: RwLock<HashMap<ConnectionId, EventSender>>,
}

impl Dispatcher {
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self {
            presence,
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    /// Register a freshly accepted socket. Events for it arrive on the
    /// returned receiver.
    pub async fn attach(&self, connection: ConnectionId) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut connections = self.connections.write().await;
        connections.insert(connection, tx);
        debug!(conn = %connection, total = connections.len(), "Connection attached");
        rx
    }

    /// Drop a socket. If it carried an authenticated user, everyone is told
    /// that user went offline.
    pub async fn detach(&self, connection: &ConnectionId) {
        self.connections.write().await.remove(connection);

        if let Some(user) = self.presence.disconnect(connection).await {
            info!(user = %user, conn = %connection, "User offline");
            self.broadcast_presence(user, false).await;
        } else {
            debug!(conn = %connection, "Anonymous connection detached");
        }
    }

    /// Bind `connection` to `user` and broadcast that the user is online.
    pub async fn authenticate(&self, user: UserId, connection: ConnectionId) {
        let outcome = self.presence.authenticate(user, connection).await;
        if let Some(old) = outcome.replaced {
            debug!(user = %user, old = %old, "Previous connection superseded");
        }
        if let Some(prev) = outcome.previous_user {
            self.broadcast_presence(prev, false).await;
        }
        info!(user = %user, conn = %connection, "User online");
        self.broadcast_presence(user, true).await;
    }

    /// Push `event` to `target` if online. Returns whether it was handed to a
    /// live socket.
    pub async fn notify(&self, target: &UserId, event: ServerEvent) -> bool {
        let Some(connection) = self.presence.connection_for(target).await else {
            trace!(target = %target, event = event.name(), "Target offline, dropping event");
            return false;
        };
        self.send_to(&connection, event).await
    }

    /// Push a per-member event to every online member. `make_event` is only
    /// called for members that are online.
    pub async fn notify_group<F>(&self, members: &[UserId], mut make_event: F) -> usize
    where
        F: FnMut(&UserId) -> ServerEvent,
    {
        let mut delivered = 0;
        for member in members {
            let Some(connection) = self.presence.connection_for(member).await else {
                continue;
            };
            if self.send_to(&connection, make_event(member)).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Tell every attached socket, authenticated or not, about a presence
    /// change. There is no contact filtering.
    pub async fn broadcast_presence(&self, user: UserId, online: bool) {
        let event = ServerEvent::UserStatus(UserStatus {
            user_id: user,
            online,
        });
        let connections = self.connections.read().await;
        for tx in connections.values() {
            let _ = tx.send(event.clone());
        }
    }

    /// Forward a typing indicator from the user behind `from` to `target`.
    /// Ignored when `from` is not authenticated or `target` is offline.
    pub async fn relay_typing(&self, from: &ConnectionId, target: &UserId, typing: bool) -> bool {
        let Some(sender) = self.presence.user_for(from).await else {
            return false;
        };
        let notice = TypingNotice {
            user_id: sender,
            chat_id: ChatId::from(sender),
        };
        let event = if typing {
            ServerEvent::UserTyping(notice)
        } else {
            ServerEvent::UserStopTyping(notice)
        };
        self.notify(target, event).await
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    async fn send_to(&self, connection: &ConnectionId, event: ServerEvent) -> bool {
        let connections = self.connections.read().await;
        match connections.get(connection) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}
