//! Real-time events exchanged over the WebSocket.
//!
//! Every frame is a JSON text frame shaped `{"event": "<name>", "data": ...}`.

use serde::{Deserialize, Serialize};

use mimigram_shared::{ChatId, MessageId, UserId};
use mimigram_store::Reaction;

use crate::conversation::MessageView;

/// Frames a client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Bind this connection to the account owning the token.
    Authenticate(String),
    Typing(TypingTarget),
    StopTyping(TypingTarget),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingTarget {
    /// The user being typed to.
    pub chat_id: UserId,
}

/// Frames the server pushes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    UserStatus(UserStatus),
    UserTyping(TypingNotice),
    UserStopTyping(TypingNotice),
    NewMessage(NewMessage),
    MessageUpdated(MessageUpdated),
    MessageRead(MessageRead),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::UserStatus(_) => "user-status",
            ServerEvent::UserTyping(_) => "user-typing",
            ServerEvent::UserStopTyping(_) => "user-stop-typing",
            ServerEvent::NewMessage(_) => "new-message",
            ServerEvent::MessageUpdated(_) => "message-updated",
            ServerEvent::MessageRead(_) => "message-read",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    pub user_id: UserId,
    pub online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub user_id: UserId,
    pub chat_id: ChatId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub message: MessageView,
}

/// Only the fields that changed are present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdated {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<Vec<Reaction>>,
}

impl MessageUpdated {
    pub fn new(chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            chat_id,
            message_id,
            text: None,
            edited: None,
            deleted: None,
            reactions: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    pub chat_id: ChatId,
}
