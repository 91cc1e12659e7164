//! Bus roster snapshots.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::descriptor::{MessageType, StubDescriptor};

/// Metadata key carrying the application display name.
pub const NAME_KEY: &str = "app.name";
/// Metadata key carrying the application icon URL.
pub const ICON_KEY: &str = "app.icon.url";
/// Metadata key carrying the launch locator.
pub const LOCATOR_KEY: &str = "app.launch.locator";
/// Value of the stub flag.
pub const STUB_TOKEN: &str = "__STUB__";

/// Per-application stub flag key (`stubhub.stub.<name>`).
pub fn stub_flag_key(name: &str) -> String {
    format!("stubhub.stub.{name}")
}

/// Bus-assigned public id of a client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key/value metadata a client declares on the bus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientMetadata(BTreeMap<String, String>);

impl ClientMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata a stub declares for `descriptor`, flag included.
    pub fn for_stub(descriptor: &StubDescriptor) -> Self {
        let mut metadata = Self::new();
        for (key, value) in &descriptor.metadata {
            metadata.insert(key.clone(), value.clone());
        }
        metadata.insert(NAME_KEY, descriptor.name.clone());
        metadata.insert(LOCATOR_KEY, descriptor.launch_locator.clone());
        if let Some(icon) = &descriptor.icon {
            metadata.insert(ICON_KEY, icon.to_string());
        }
        metadata.insert(stub_flag_key(&descriptor.name), STUB_TOKEN);
        metadata
    }

    /// Metadata of a plain (non-stub) client.
    pub fn named(name: impl Into<String>) -> Self {
        let mut metadata = Self::new();
        metadata.insert(NAME_KEY, name.into());
        metadata
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.get(NAME_KEY)
    }
}

/// One client in a roster snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub client_id: ClientId,
    pub display_name: String,
    pub metadata: ClientMetadata,
    pub subscriptions: Vec<MessageType>,
}

impl RosterEntry {
    pub fn new(client_id: ClientId, metadata: ClientMetadata, subscriptions: Vec<MessageType>) -> Self {
        let display_name = metadata.name().unwrap_or_default().to_string();
        Self {
            client_id,
            display_name,
            metadata,
            subscriptions,
        }
    }

    /// Does this entry carry the broker's own stub marker?
    pub fn is_stub_flagged(&self) -> bool {
        self.metadata.get(&stub_flag_key(&self.display_name)) == Some(STUB_TOKEN)
    }
}
