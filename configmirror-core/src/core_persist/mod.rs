/*
    core_persist - Durable copies of the replica

    One JSON file per concern, named after the instance:
    - config_<instanceId>.json       items keyed by `key`
    - blocked_ips_<instanceId>.json  blocked addresses
*/

pub mod errors;
pub mod writer;

pub use errors::{PersistError, PersistResult};
pub use writer::{FileSnapshotWriter, ReplicaPersistence};
