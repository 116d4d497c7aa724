/*
    core_link - Connection to the authority

    - channel:       PushChannel trait, ConnectionState, ChannelEvent
    - hub_protocol:  JSON hub frame codec
    - ws_channel:    WebSocket PushChannel with fixed-delay reconnect
    - bulk_load:     BulkLoader trait and HTTP implementation
    - identity:      instance id + local address sent at registration
    - supervisor:    state machine driving register -> bulk load -> live updates
    - mock:          in-memory collaborators for tests

    ┌──────────────┐  ChannelEvent (mpsc)  ┌──────────────────────┐
    │  PushChannel │──────────────────────►│ ConnectionSupervisor │
    │  (transport) │◄──────────────────────│                      │
    └──────────────┘  RegisterInstance     └───┬──────────────┬───┘
                      ReportMetrics            │              │
                                         Reconciler   TelemetryReporter
*/

pub mod bulk_load;
pub mod channel;
pub mod hub_protocol;
pub mod identity;
pub mod mock;
pub mod supervisor;
pub mod ws_channel;

pub use bulk_load::{BulkLoadError, BulkLoadResult, BulkLoader, HttpBulkLoader};
pub use channel::{ChannelError, ChannelEvent, ChannelResult, ConnectionState, PushChannel};
pub use identity::InstanceIdentity;
pub use mock::{Invocation, MockPushChannel, StaticBulkLoader};
pub use supervisor::{ConnectionSupervisor, ResyncPolicy};
pub use ws_channel::{WsChannelConfig, WsPushChannel};
