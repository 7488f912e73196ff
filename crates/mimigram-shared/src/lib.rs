//! # mimigram-shared
//!
//! Identifier types, conversation key routing and protocol constants shared by
//! the store and the server.

pub mod constants;
pub mod conversation;
pub mod types;

pub use conversation::{key_for, key_for_group, ConversationKey};
pub use types::{ChatId, ConnectionId, GroupId, MessageId, UserId};
