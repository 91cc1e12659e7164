//! Implementations - 具体的な実装
//!
//! - InMemoryBus: in-process hub for development and tests
//! - CommandLauncher: starts applications with an external command
//! - LoopbackLauncher: closes the launch loop on the in-memory bus
//! - BroadcastEventSink / NoopEventSink

pub mod broadcast_events;
pub mod command_launcher;
pub mod inmem_bus;
pub mod loopback_launcher;

pub use self::broadcast_events::{BroadcastEventSink, NoopEventSink};
pub use self::command_launcher::CommandLauncher;
pub use self::inmem_bus::InMemoryBus;
pub use self::loopback_launcher::LoopbackLauncher;
