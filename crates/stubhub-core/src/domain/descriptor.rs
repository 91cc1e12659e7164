//! Stub descriptors: the immutable description of one emulated application.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// A message kind an application declares it can handle (e.g. `table.load.votable`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(String);

impl MessageType {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Descriptor of one application a stub stands in for.
///
/// Loaded once from the catalog and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StubDescriptor {
    pub name: String,

    #[serde(default)]
    pub icon: Option<Url>,

    /// Declared capabilities, in catalog order.
    #[serde(default)]
    pub capabilities: Vec<MessageType>,

    /// What the process launcher is handed (URL, command argument, ...).
    pub launch_locator: String,

    /// Wait between "real client found" and forwarding; `None` falls back to
    /// the broker default.
    #[serde(default)]
    pub prelaunch_delay_ms: Option<u64>,

    /// Extra metadata declared on the bus next to the name and icon.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl StubDescriptor {
    pub fn new(name: impl Into<String>, launch_locator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            icon: None,
            capabilities: Vec::new(),
            launch_locator: launch_locator.into(),
            prelaunch_delay_ms: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_capability(mut self, mtype: impl Into<MessageType>) -> Self {
        self.capabilities.push(mtype.into());
        self
    }

    pub fn with_prelaunch_delay(mut self, delay: Duration) -> Self {
        self.prelaunch_delay_ms = Some(delay.as_millis() as u64);
        self
    }

    pub fn prelaunch_delay(&self, default: Duration) -> Duration {
        self.prelaunch_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(default)
    }

    pub fn handles(&self, mtype: &MessageType) -> bool {
        self.capabilities.contains(mtype)
    }
}
