//! In-memory backend. Nothing survives the process; used by tests and by
//! servers started without a database path.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::collections::{Collection, CollectionStore};
use crate::error::{Result, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<Collection, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CollectionStore for MemoryStore {
    fn load(&self, collection: Collection) -> Result<Option<String>> {
        let collections = self.collections.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(collections.get(&collection).cloned())
    }

    fn save(&self, collection: Collection, json: &str) -> Result<()> {
        let mut collections = self.collections.lock().map_err(|_| StoreError::Poisoned)?;
        collections.insert(collection, json.to_string());
        Ok(())
    }
}
