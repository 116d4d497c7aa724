/*
    core_replica - Local mirror of authority state

    Pure in-memory data structures, no I/O:
    - ConfigItem / BlockedAddress / ReplicaSnapshot model
    - ReplicaStore guarded by a single lock
*/

pub mod errors;
pub mod model;
pub mod store;

#[cfg(test)]
mod tests;

pub use errors::{ReplicaError, ReplicaResult};
pub use model::{BlockedAddress, ConfigItem, ItemId, ReplicaSnapshot};
pub use store::ReplicaStore;
