/*
    Last-write-wins property tests

    Whatever the version numbers say, the item applied last is the one kept.
*/

use crate::core_replica::{BlockedAddress, ConfigItem, ReplicaStore};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_last_upsert_wins_regardless_of_version(
        updates in prop::collection::vec((any::<i64>(), "[a-z0-9]{0,12}"), 1..32)
    ) {
        let store = ReplicaStore::new();
        for (version, value) in &updates {
            store.upsert(ConfigItem::new(1, "A", value.clone(), *version)).unwrap();
        }

        let (last_version, last_value) = updates.last().unwrap();
        let stored = store.get("A").unwrap().unwrap();
        prop_assert_eq!(&stored.value, last_value);
        prop_assert_eq!(stored.version, *last_version);
        prop_assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn prop_delete_unknown_id_leaves_store_unchanged(
        ids in prop::collection::btree_set(0i64..100, 0..20),
        missing in 100i64..1000
    ) {
        let store = ReplicaStore::new();
        for id in &ids {
            store.upsert(ConfigItem::new(*id, format!("key-{}", id), "v", 1)).unwrap();
        }

        let before = store.snapshot().unwrap();
        store.delete_by_id(missing).unwrap();
        let after = store.snapshot().unwrap();

        prop_assert_eq!(before.items, after.items);
    }

    #[test]
    fn prop_blocking_is_idempotent(
        address in "10\\.0\\.[0-9]{1,3}\\.[0-9]{1,3}",
        reasons in prop::collection::vec("[a-z]{1,8}", 1..8)
    ) {
        let store = ReplicaStore::new();
        for reason in &reasons {
            store.block_address(BlockedAddress::new(address.clone(), reason.clone())).unwrap();
        }

        prop_assert_eq!(store.blocked_len().unwrap(), 1);
    }
}
