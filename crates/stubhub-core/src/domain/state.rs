//! Stub lifecycle states.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one stub.
///
/// Healthy progression:
/// - Undefined -> Initializing -> Connecting -> Registering -> Listening
/// - Listening -> Launching -> Seeking -> Forwarding -> Disconnecting -> Dying
/// - Dying -> Initializing (re-armed by the next `connect()`)
///
/// Failure branches:
/// - {Launching, Seeking, Forwarding} -> Failing -> Listening
/// - any connected state -> Disconnecting -> Dying
///
/// Variant order is the total order used by the transition guards, so do not
/// reorder variants. `Failing` sits inside the connected range: a failing stub
/// still owns its bus registration and goes back to `Listening`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StubState {
    /// Created, never connected.
    Undefined,
    /// `connect()` accepted.
    Initializing,
    /// Registering the stub client on the bus.
    Connecting,
    /// Declaring the stub capabilities.
    Registering,
    /// Registered, waiting for traffic.
    Listening,
    /// Real application process requested.
    Launching,
    /// Real application found, waiting out the pre-forward delay.
    Seeking,
    /// Replaying queued messages to the real application.
    Forwarding,
    /// Launch failed, queued messages being reported.
    Failing,
    /// Leaving the bus.
    Disconnecting,
    /// Off the bus; may be re-armed with `connect()`.
    Dying,
}

impl StubState {
    pub fn is_after(self, other: StubState) -> bool {
        self > other
    }

    pub fn is_before(self, other: StubState) -> bool {
        self < other
    }

    /// Strictly between `Initializing` and `Disconnecting`.
    ///
    /// This is the state half of `Stub::is_connected()`; the other half is the
    /// bus reporting the connection as active.
    pub fn holds_registration(self) -> bool {
        self.is_after(StubState::Initializing) && self.is_before(StubState::Disconnecting)
    }

    /// Strictly between `Registering` and `Disconnecting`: capabilities are
    /// declared, so the stub may receive and forward traffic.
    pub fn accepts_traffic(self) -> bool {
        self.is_after(StubState::Registering) && self.is_before(StubState::Disconnecting)
    }

    /// `connect()` only acts from these states.
    pub fn is_connectable(self) -> bool {
        matches!(self, StubState::Undefined | StubState::Dying)
    }

    /// States in which the pending queue may be non-empty.
    pub fn may_hold_messages(self) -> bool {
        matches!(
            self,
            StubState::Launching | StubState::Seeking | StubState::Forwarding
        )
    }

    pub const ALL: [StubState; 11] = [
        StubState::Undefined,
        StubState::Initializing,
        StubState::Connecting,
        StubState::Registering,
        StubState::Listening,
        StubState::Launching,
        StubState::Seeking,
        StubState::Forwarding,
        StubState::Failing,
        StubState::Disconnecting,
        StubState::Dying,
    ];
}

impl std::fmt::Display for StubState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StubState::Undefined => "UNDEFINED",
            StubState::Initializing => "INITIALIZING",
            StubState::Connecting => "CONNECTING",
            StubState::Registering => "REGISTERING",
            StubState::Listening => "LISTENING",
            StubState::Launching => "LAUNCHING",
            StubState::Seeking => "SEEKING",
            StubState::Forwarding => "FORWARDING",
            StubState::Failing => "FAILING",
            StubState::Disconnecting => "DISCONNECTING",
            StubState::Dying => "DYING",
        };
        f.write_str(label)
    }
}

/// Observable progress of one stub.
///
/// `forwarded` and `failed` count completed forward cycles and launch
/// failures, so waiters can detect an outcome even when the intermediate
/// states went by too fast to be observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StubProgress {
    pub state: StubState,
    pub forwarded: u64,
    pub failed: u64,
}

impl StubProgress {
    pub fn new() -> Self {
        Self {
            state: StubState::Undefined,
            forwarded: 0,
            failed: 0,
        }
    }
}

impl Default for StubProgress {
    fn default() -> Self {
        Self::new()
    }
}
