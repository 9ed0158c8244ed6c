//! Session lifecycle: state machine, manager, observers, metrics, and the
//! reconnection supervisor.

pub mod events;
pub mod manager;
pub mod metrics;
pub mod state;
pub mod supervisor;

pub use events::{NoticeCallback, ObserverRegistry, Subscription};
pub use manager::{AiConfigUpdate, SessionManager};
pub use metrics::{ConnectionMetrics, DiagnosticsSnapshot, Metrics};
pub use state::ConnectionState;
pub use supervisor::{FailureKind, ReconnectPolicy};
