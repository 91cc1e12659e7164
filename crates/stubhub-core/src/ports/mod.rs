//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! The bus client library, the process runner and the GUI are collaborators
//! reached only through these traits.

pub mod bus;
pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod launcher;

pub use self::bus::{BusConnector, RosterChange};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::launcher::{LaunchOutcome, LaunchStatus, LaunchTicket, ProcessLauncher};
