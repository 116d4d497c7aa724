/*
    store.rs - In-memory replica of authority state

    Holds configuration items (keyed by `key`, with an `id -> key` index for
    deletions) and the blocked-address set. All operations go through one
    RwLock over the whole state, so a snapshot never observes a half-applied
    mutation and the two indexes never disagree.

    Conflict policy is last-write-wins by arrival: `version` is carried but
    never compared.
*/

use crate::core_replica::errors::{ReplicaError, ReplicaResult};
use crate::core_replica::model::{BlockedAddress, ConfigItem, ItemId, ReplicaSnapshot};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

/// Helper to convert poison errors into ReplicaError
fn handle_poison<T>(_err: PoisonError<T>) -> ReplicaError {
    ReplicaError::LockPoisoned("a thread panicked while holding the replica lock".to_string())
}

#[derive(Debug, Default)]
struct ReplicaState {
    items: BTreeMap<String, ConfigItem>,
    id_index: HashMap<ItemId, String>,
    blocked: BTreeMap<String, BlockedAddress>,
}

impl ReplicaState {
    fn upsert(&mut self, item: ConfigItem) {
        // The id moved to a new key: evict the stale entry
        if let Some(old_key) = self.id_index.get(&item.id) {
            if *old_key != item.key {
                let old_key = old_key.clone();
                self.items.remove(&old_key);
            }
        }

        self.id_index.insert(item.id, item.key.clone());

        if let Some(previous) = self.items.insert(item.key.clone(), item) {
            let current_id = self.items[&previous.key].id;
            if previous.id != current_id {
                self.id_index.remove(&previous.id);
            }
        }
    }

    fn delete_by_id(&mut self, id: ItemId) -> Option<ConfigItem> {
        let key = self.id_index.remove(&id)?;
        self.items.remove(&key)
    }
}

/// Thread-safe replica shared by the dispatch loop and the telemetry reporter
#[derive(Debug, Default)]
pub struct ReplicaStore {
    state: RwLock<ReplicaState>,
}

impl ReplicaStore {
    /// Create an empty replica
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the item stored under `item.key`
    pub fn upsert(&self, item: ConfigItem) -> ReplicaResult<()> {
        self.state.write().map_err(handle_poison)?.upsert(item);
        Ok(())
    }

    /// Remove the item with `id`. Unknown ids are ignored.
    pub fn delete_by_id(&self, id: ItemId) -> ReplicaResult<Option<ConfigItem>> {
        Ok(self.state.write().map_err(handle_poison)?.delete_by_id(id))
    }

    /// Add `address` to the blocked set, keeping the latest reason.
    ///
    /// Returns `true` if the address was not blocked before.
    pub fn block_address(&self, blocked: BlockedAddress) -> ReplicaResult<bool> {
        let mut state = self.state.write().map_err(handle_poison)?;
        Ok(state
            .blocked
            .insert(blocked.address.clone(), blocked)
            .is_none())
    }

    /// Replace every item with `items`. The blocked set is untouched.
    pub fn replace_all(&self, items: Vec<ConfigItem>) -> ReplicaResult<()> {
        let mut fresh = ReplicaState::default();
        for item in items {
            fresh.upsert(item);
        }

        let mut state = self.state.write().map_err(handle_poison)?;
        state.items = fresh.items;
        state.id_index = fresh.id_index;
        Ok(())
    }

    /// Load a previously persisted snapshot, replacing current contents
    pub fn restore(&self, snapshot: ReplicaSnapshot) -> ReplicaResult<()> {
        let mut fresh = ReplicaState::default();
        for item in snapshot.items.into_values() {
            fresh.upsert(item);
        }
        fresh.blocked = snapshot.blocked;

        *self.state.write().map_err(handle_poison)? = fresh;
        Ok(())
    }

    /// Copy the whole replica out under the lock
    pub fn snapshot(&self) -> ReplicaResult<ReplicaSnapshot> {
        let state = self.state.read().map_err(handle_poison)?;
        Ok(ReplicaSnapshot {
            items: state.items.clone(),
            blocked: state.blocked.clone(),
            taken_at: Utc::now(),
        })
    }

    pub fn get(&self, key: &str) -> ReplicaResult<Option<ConfigItem>> {
        Ok(self.state.read().map_err(handle_poison)?.items.get(key).cloned())
    }

    pub fn len(&self) -> ReplicaResult<usize> {
        Ok(self.state.read().map_err(handle_poison)?.items.len())
    }

    pub fn is_empty(&self) -> ReplicaResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn blocked_len(&self) -> ReplicaResult<usize> {
        Ok(self.state.read().map_err(handle_poison)?.blocked.len())
    }

    pub fn is_blocked(&self, address: &str) -> ReplicaResult<bool> {
        Ok(self
            .state
            .read()
            .map_err(handle_poison)?
            .blocked
            .contains_key(address))
    }

    /// Highest item version, 0 when empty
    pub fn max_version(&self) -> ReplicaResult<i64> {
        Ok(self
            .state
            .read()
            .map_err(handle_poison)?
            .items
            .values()
            .map(|item| item.version)
            .max()
            .unwrap_or(0))
    }
}
