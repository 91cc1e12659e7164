//! Domain model (ids, states, descriptors, messages, roster, events, errors).

pub mod descriptor;
pub mod errors;
pub mod events;
pub mod ids;
pub mod message;
pub mod roster;
pub mod state;

pub use self::descriptor::{MessageType, StubDescriptor};
pub use self::errors::{BrokerError, BusError, LaunchError};
pub use self::events::{BrokerEvent, SniffedApplication};
pub use self::ids::{ConnectionId, LaunchId};
pub use self::message::{InboundMessage, Message};
pub use self::roster::{ClientId, ClientMetadata, RosterEntry};
pub use self::state::{StubProgress, StubState};
