//! Conversation routing.
//!
//! Every message log is addressed by a [`ConversationKey`]. Both participants
//! of a 1:1 chat derive the same key no matter who computes it, and group
//! keys live in their own namespace so they can never collide with a pair key.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{DIRECT_KEY_SEPARATOR, GROUP_KEY_PREFIX};
use crate::types::{GroupId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_group(&self) -> bool {
        self.0.starts_with(GROUP_KEY_PREFIX)
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of the 1:1 log between `a` and `b`. Commutative.
pub fn key_for(a: &UserId, b: &UserId) -> ConversationKey {
    let mut pair = [a.to_string(), b.to_string()];
    pair.sort();
    ConversationKey(pair.join(DIRECT_KEY_SEPARATOR))
}

/// Key of a group's log.
///
/// Pair keys only ever contain lowercase hex digits and `-`, so the `group:`
/// prefix keeps the two namespaces disjoint.
pub fn key_for_group(group: &GroupId) -> ConversationKey {
    ConversationKey(format!("{GROUP_KEY_PREFIX}{group}"))
}
