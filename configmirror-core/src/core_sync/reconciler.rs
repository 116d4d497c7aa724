/*
    reconciler.rs - Event -> replica mutation -> snapshot write

    | Event              | Action                                   |
    |--------------------|------------------------------------------|
    | bulk snapshot      | upsert each item in order, persist config |
    | resync             | replace all items, persist config         |
    | item pushed        | upsert, persist config                    |
    | item removed       | delete by id, persist config              |
    | address blocked    | block, persist blocked set                |

    No batching: each call mutates and writes before returning. A failed
    write is logged and counted; the in-memory replica stays authoritative.
*/

use crate::core_persist::{PersistResult, ReplicaPersistence};
use crate::core_replica::{
    BlockedAddress, ConfigItem, ItemId, ReplicaResult, ReplicaSnapshot, ReplicaStore,
};
use crate::core_sync::events::HubNotification;
use crate::metrics::{
    record_counter, record_gauge, ADDRESSES_BLOCKED, ITEMS_COUNT, ITEMS_DELETED, ITEMS_UPSERTED,
    PERSIST_FAILURES,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Applies inbound events to the replica and persists the result
pub struct Reconciler {
    store: Arc<ReplicaStore>,
    persistence: Arc<dyn ReplicaPersistence>,
}

impl Reconciler {
    pub fn new(store: Arc<ReplicaStore>, persistence: Arc<dyn ReplicaPersistence>) -> Self {
        Self { store, persistence }
    }

    pub fn store(&self) -> &Arc<ReplicaStore> {
        &self.store
    }

    /// Seed the replica from a bulk load, returning the number of items applied
    pub fn apply_bulk(&self, items: Vec<ConfigItem>) -> ReplicaResult<usize> {
        let count = items.len();
        for item in items {
            self.store.upsert(item)?;
        }
        record_counter(ITEMS_UPSERTED, count as u64);

        info!("Bulk load applied {} configuration items", count);
        self.persist_config()?;
        Ok(count)
    }

    /// Replace the item set wholesale after a reconnect
    pub fn apply_resync(&self, items: Vec<ConfigItem>) -> ReplicaResult<usize> {
        let count = items.len();
        self.store.replace_all(items)?;

        info!("Resync replaced replica with {} configuration items", count);
        self.persist_config()?;
        Ok(count)
    }

    pub fn on_item_pushed(&self, item: ConfigItem) -> ReplicaResult<()> {
        debug!("Configuration updated: {} (v{})", item.key, item.version);
        self.store.upsert(item)?;
        record_counter(ITEMS_UPSERTED, 1);

        self.persist_config()
    }

    /// Returns whether an item was actually removed
    pub fn on_item_removed(&self, id: ItemId) -> ReplicaResult<bool> {
        let removed = self.store.delete_by_id(id)?;
        match &removed {
            Some(item) => {
                debug!("Configuration deleted: {} (id {})", item.key, id);
                record_counter(ITEMS_DELETED, 1);
            }
            None => debug!("Delete for unknown configuration id {} ignored", id),
        }

        self.persist_config()?;
        Ok(removed.is_some())
    }

    /// Returns whether the address was newly blocked
    pub fn on_address_blocked(&self, blocked: BlockedAddress) -> ReplicaResult<bool> {
        info!("Address blocked: {} ({})", blocked.address, blocked.reason);
        let newly_blocked = self.store.block_address(blocked)?;
        record_counter(ADDRESSES_BLOCKED, 1);

        self.persist_blocked()?;
        Ok(newly_blocked)
    }

    /// Dispatch a hub notification to the matching handler
    pub fn apply(&self, notification: HubNotification) -> ReplicaResult<()> {
        match notification {
            HubNotification::ItemPushed(item) => self.on_item_pushed(item),
            HubNotification::ItemRemoved(id) => self.on_item_removed(id).map(|_| ()),
            HubNotification::AddressBlocked(blocked) => {
                self.on_address_blocked(blocked).map(|_| ())
            }
        }
    }

    fn persist_config(&self) -> ReplicaResult<()> {
        let snapshot = self.store.snapshot()?;
        record_gauge(ITEMS_COUNT, snapshot.item_count() as f64);

        let result = self.persistence.write_config_snapshot(&snapshot);
        log_persist_failure("configuration", result);
        Ok(())
    }

    fn persist_blocked(&self) -> ReplicaResult<()> {
        let snapshot: ReplicaSnapshot = self.store.snapshot()?;

        let result = self.persistence.write_blocked_snapshot(&snapshot);
        log_persist_failure("blocked-address", result);
        Ok(())
    }
}

fn log_persist_failure(what: &str, result: PersistResult<()>) {
    if let Err(e) = result {
        record_counter(PERSIST_FAILURES, 1);
        warn!("Failed to persist {} snapshot: {}", what, e);
    }
}
