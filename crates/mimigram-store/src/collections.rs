//! Whole-collection persistence contract.
//!
//! A backend stores one JSON document per [`Collection`]. There are no
//! partial updates: saving a collection replaces it entirely. [`Persistence`]
//! serializes its read-modify-write cycles so that writers touching different
//! entries of one collection do not clobber each other.

use std::collections::BTreeMap;
use std::result::Result as StdResult;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

use mimigram_shared::{ConversationKey, GroupId, UserId};

use crate::error::{Result, StoreError};
use crate::models::{ChatEntry, Group, Message, Profile, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Profiles,
    Chats,
    Messages,
    Groups,
    Stickers,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Profiles => "profiles",
            Collection::Chats => "chats",
            Collection::Messages => "messages",
            Collection::Groups => "groups",
            Collection::Stickers => "stickers",
        }
    }
}

/// Raw storage backend. `load` returns `None` for a collection that was never
/// saved.
pub trait CollectionStore: Send + Sync {
    fn load(&self, collection: Collection) -> Result<Option<String>>;
    fn save(&self, collection: Collection, json: &str) -> Result<()>;
}

pub type Users = Vec<User>;
pub type Profiles = BTreeMap<UserId, Profile>;
pub type Chats = BTreeMap<UserId, Vec<ChatEntry>>;
pub type Messages = BTreeMap<ConversationKey, Vec<Message>>;
pub type Groups = BTreeMap<GroupId, Group>;
/// Stickers are opaque client payloads, kept per owner in insertion order.
pub type Stickers = BTreeMap<UserId, Vec<serde_json::Value>>;

/// Typed view over a [`CollectionStore`]. Cheap to clone; clones share one
/// write lock.
///
/// Every `update_*` call holds that lock from load to save, so two writers
/// never overwrite each other's changes to a collection. Reads take no lock,
/// which means a value read earlier and written back later through an
/// `update_*` closure can still replace a newer value for the same entry.
#[derive(Clone)]
pub struct Persistence {
    backend: Arc<dyn CollectionStore>,
    write_lock: Arc<Mutex<()>>,
}

impl Persistence {
    pub fn new(backend: Arc<dyn CollectionStore>) -> Self {
        Self {
            backend,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn users(&self) -> Result<Users> {
        self.load_as(Collection::Users)
    }

    pub fn update_users<R, E>(&self, f: impl FnOnce(&mut Users) -> StdResult<R, E>) -> StdResult<R, E>
    where
        E: From<StoreError>,
    {
        self.update_as(Collection::Users, f)
    }

    pub fn profiles(&self) -> Result<Profiles> {
        self.load_as(Collection::Profiles)
    }

    pub fn update_profiles<R, E>(
        &self,
        f: impl FnOnce(&mut Profiles) -> StdResult<R, E>,
    ) -> StdResult<R, E>
    where
        E: From<StoreError>,
    {
        self.update_as(Collection::Profiles, f)
    }

    pub fn chats(&self) -> Result<Chats> {
        self.load_as(Collection::Chats)
    }

    pub fn update_chats<R, E>(&self, f: impl FnOnce(&mut Chats) -> StdResult<R, E>) -> StdResult<R, E>
    where
        E: From<StoreError>,
    {
        self.update_as(Collection::Chats, f)
    }

    pub fn messages(&self) -> Result<Messages> {
        self.load_as(Collection::Messages)
    }

    pub fn update_messages<R, E>(
        &self,
        f: impl FnOnce(&mut Messages) -> StdResult<R, E>,
    ) -> StdResult<R, E>
    where
        E: From<StoreError>,
    {
        self.update_as(Collection::Messages, f)
    }

    pub fn groups(&self) -> Result<Groups> {
        self.load_as(Collection::Groups)
    }

    pub fn update_groups<R, E>(&self, f: impl FnOnce(&mut Groups) -> StdResult<R, E>) -> StdResult<R, E>
    where
        E: From<StoreError>,
    {
        self.update_as(Collection::Groups, f)
    }

    pub fn stickers(&self) -> Result<Stickers> {
        self.load_as(Collection::Stickers)
    }

    pub fn update_stickers<R, E>(
        &self,
        f: impl FnOnce(&mut Stickers) -> StdResult<R, E>,
    ) -> StdResult<R, E>
    where
        E: From<StoreError>,
    {
        self.update_as(Collection::Stickers, f)
    }

    /// Load, mutate and save `collection` under the write lock. Nothing is
    /// saved when `f` fails.
    fn update_as<T, R, E>(
        &self,
        collection: Collection,
        f: impl FnOnce(&mut T) -> StdResult<R, E>,
    ) -> StdResult<R, E>
    where
        T: DeserializeOwned + Serialize + Default,
        E: From<StoreError>,
    {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut value: T = self.load_as(collection)?;
        let out = f(&mut value)?;
        self.save_as(collection, &value)?;
        Ok(out)
    }

    fn load_as<T: DeserializeOwned + Default>(&self, collection: Collection) -> Result<T> {
        match self.backend.load(collection)? {
            Some(json) if !json.trim().is_empty() => {
                serde_json::from_str(&json).map_err(|source| StoreError::Malformed {
                    collection: collection.name(),
                    source,
                })
            }
            _ => Ok(T::default()),
        }
    }

    fn save_as<T: Serialize>(&self, collection: Collection, value: &T) -> Result<()> {
        let json = serde_json::to_string(value).map_err(|source| StoreError::Malformed {
            collection: collection.name(),
            source,
        })?;
        self.backend.save(collection, &json)?;
        tracing::trace!(collection = collection.name(), bytes = json.len(), "saved collection");
        Ok(())
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence").finish_non_exhaustive()
    }
}
