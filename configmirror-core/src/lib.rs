//! configmirror-core: a local, persistent mirror of centrally managed
//! configuration and blocked addresses.
//!
//! The authority pushes changes over a hub connection; the agent applies them
//! to an in-memory replica, writes a JSON snapshot after each change and
//! reports metrics back while connected.

pub mod agent;
pub mod config;
pub mod core_link;
pub mod core_persist;
pub mod core_replica;
pub mod core_sync;
pub mod core_telemetry;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod shutdown;

pub use agent::{AgentError, AgentHandle, AgentResult, MirrorAgent};
pub use config::{AgentConfig, ConfigError};
pub use core_link::{ConnectionState, InstanceIdentity, ResyncPolicy};
pub use core_replica::{BlockedAddress, ConfigItem, ReplicaSnapshot, ReplicaStore};
pub use health::{AgentStatus, HealthStatus};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
pub use shutdown::ShutdownCoordinator;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let _ = ConnectionState::default();
        let _ = ResyncPolicy::default();
        let _ = AgentConfig::default();
    }
}
