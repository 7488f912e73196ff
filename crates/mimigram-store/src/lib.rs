//! # mimigram-store
//!
//! Persistence for Mimigram. The store knows nothing about chat semantics: it
//! loads and saves whole collections (users, profiles, chats, messages,
//! groups, stickers) as JSON documents. [`Persistence`] makes each
//! read-modify-write of one collection atomic; it does not isolate a value
//! read earlier from a later write of the same entry.
//!
//! Two backends implement [`CollectionStore`]: the SQLite-backed [`Database`]
//! used by the server and the in-memory [`MemoryStore`] used by tests.
//! [`Persistence`] wraps either one with typed accessors.

pub mod collections;
pub mod database;
pub mod memory;
pub mod migrations;
pub mod models;

mod error;

pub use collections::{Collection, CollectionStore, Persistence};
pub use database::Database;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use models::*;
