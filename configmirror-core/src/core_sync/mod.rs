/*
    core_sync - Applies authority events to the replica

    Inputs:
    - bulk snapshot from the bulk loader
    - ConfigurationUpdated / ConfigurationDeleted / IpBlocked hub notifications

    Each event is one store mutation followed by one snapshot write.
*/

pub mod events;
pub mod reconciler;

pub use events::HubNotification;
pub use reconciler::Reconciler;
