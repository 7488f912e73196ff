//! # mimigram-server
//!
//! Real-time chat backend: a REST API for accounts, direct chats, groups and
//! stickers, plus a WebSocket channel that pushes presence, typing and
//! message events to connected clients.
//!
//! Messages are persisted before any push is attempted. Pushes are
//! fire-and-forget, so an offline recipient simply reads the message from
//! the log later.

pub mod accounts;
pub mod api;
pub mod auth;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod groups;
pub mod messaging;
pub mod presence;
pub mod ws;
