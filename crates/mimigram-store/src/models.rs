//! Domain records persisted by the store.
//!
//! Every struct derives `Serialize` and `Deserialize` and uses camelCase field
//! names, so the same values are written to the backing store and handed to
//! clients as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mimigram_shared::{ChatId, GroupId, MessageId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// An account. `username` is the unique public handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub username: String,
    pub password: String,
    /// Current session token, rotated on every login.
    pub token: String,
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub blocked_users: Vec<UserId>,
}

impl Profile {
    /// `"first last"`, trimmed. Empty when neither part is set.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn has_blocked(&self, user: &UserId) -> bool {
        self.blocked_users.contains(user)
    }
}

// ---------------------------------------------------------------------------
// Chat list entry
// ---------------------------------------------------------------------------

/// One row of a user's chat list: either a peer or a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub id: ChatId,
    pub is_group: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl ChatEntry {
    pub fn direct(user: &User, profile: Option<&Profile>) -> Self {
        Self {
            id: user.id.into(),
            is_group: false,
            username: Some(user.username.clone()),
            first_name: Some(user.first_name.clone()),
            last_name: Some(user.last_name.clone()),
            name: None,
            avatar: profile.and_then(|p| p.avatar.clone()),
        }
    }

    pub fn group(group: &Group) -> Self {
        Self {
            id: group.id.into(),
            is_group: true,
            username: None,
            first_name: None,
            last_name: None,
            name: Some(group.name.clone()),
            avatar: group.avatar.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Reference from a reply to an earlier message of the same log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRef {
    pub id: MessageId,
    /// Snippet of the original text, as captured by the replying client.
    #[serde(default)]
    pub text: String,
    /// Resolved when a log is listed, never stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

/// All users who reacted with one emoji. Never stored with an empty `users`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub emoji: String,
    pub users: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender: UserId,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    /// Voice clip length in seconds.
    #[serde(default)]
    pub voice_duration: Option<f64>,
    #[serde(default)]
    pub is_sticker: bool,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub reply_to: Option<ReplyRef>,
    /// 1:1 logs only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered: Option<bool>,
    /// 1:1 logs only. Set by the recipient, never by the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub creator: UserId,
    /// Ordered, without duplicates. The creator joins first.
    pub members: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }
}
