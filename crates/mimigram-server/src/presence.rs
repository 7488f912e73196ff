//! Presence registry: which user is behind which live connection.
//!
//! One connection per user. The two maps are kept as exact inverses of each
//! other: when a user authenticates on a new connection the old connection
//! loses its entry too, so a late disconnect of the old socket cannot knock
//! the user offline.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use mimigram_shared::{ConnectionId, UserId};

#[derive(Debug, Default)]
struct PresenceMaps {
    by_user: HashMap<UserId, ConnectionId>,
    by_connection: HashMap<ConnectionId, UserId>,
}

/// Result of [`PresenceRegistry::authenticate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authenticated {
    /// Older connection of the same user, now unbound. Closing it is up to the
    /// caller.
    pub replaced: Option<ConnectionId>,
    /// User previously bound to this connection, if it re-authenticated as
    /// someone else.
    pub previous_user: Option<UserId>,
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    maps: RwLock<PresenceMaps>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn authenticate(&self, user: UserId, connection: ConnectionId) -> Authenticated {
        let mut maps = self.maps.write().await;

        let previous_user = maps
            .by_connection
            .insert(connection, user)
            .filter(|prev| *prev != user);
        if let Some(prev) = previous_user {
            if maps.by_user.get(&prev) == Some(&connection) {
                maps.by_user.remove(&prev);
            }
        }

        let replaced = maps
            .by_user
            .insert(user, connection)
            .filter(|old| *old != connection);
        if let Some(old) = replaced {
            maps.by_connection.remove(&old);
            debug!(user = %user, old = %old, new = %connection, "Replaced user connection");
        }

        Authenticated {
            replaced,
            previous_user,
        }
    }

    /// Unbind a connection. Returns the user it carried, or `None` when the
    /// connection never authenticated (or was replaced).
    pub async fn disconnect(&self, connection: &ConnectionId) -> Option<UserId> {
        let mut maps = self.maps.write().await;
        let user = maps.by_connection.remove(connection)?;
        if maps.by_user.get(&user) == Some(connection) {
            maps.by_user.remove(&user);
        }
        Some(user)
    }

    pub async fn is_online(&self, user: &UserId) -> bool {
        self.maps.read().await.by_user.contains_key(user)
    }

    pub async fn connection_for(&self, user: &UserId) -> Option<ConnectionId> {
        self.maps.read().await.by_user.get(user).copied()
    }

    pub async fn user_for(&self, connection: &ConnectionId) -> Option<UserId> {
        self.maps.read().await.by_connection.get(connection).copied()
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        self.maps.read().await.by_user.keys().copied().collect()
    }

    #[cfg(test)]
    async fn assert_inverse(&self) {
        let maps = self.maps.read().await;
        assert_eq!(maps.by_user.len(), maps.by_connection.len());
        for (user, conn) in &maps.by_user {
            assert_eq!(maps.by_connection.get(conn), Some(user));
        }
    }
}
