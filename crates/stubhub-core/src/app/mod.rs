//! Application layer - スタブのライフサイクルと調停
//!
//! - stub: per-application state machine
//! - reconciler: roster reconciliation passes
//! - launch_queue / sniffed: broker-wide shared state
//! - dispatch: message type → stub routing
//! - worker: reconciliation and dispatch tasks
//! - broker / builder / status: wiring and views

pub mod broker;
pub mod builder;
pub mod dispatch;
pub mod launch_queue;
pub mod reconciler;
pub mod sniffed;
pub mod status;
pub mod stub;
pub mod worker;

#[cfg(test)]
mod scenarios;

pub use self::broker::{Broker, BrokerHandle};
pub use self::builder::{BrokerBuilder, BuildError};
pub use self::dispatch::{DispatchTable, StubLanes};
pub use self::launch_queue::LaunchQueue;
pub use self::reconciler::{HubReconciler, NameMatcher, PassReport};
pub use self::sniffed::SniffedAppCache;
pub use self::status::{BrokerStatus, StubStatus};
pub use self::stub::{Stub, StubContext};
