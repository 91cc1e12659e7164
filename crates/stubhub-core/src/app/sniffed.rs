//! SniffedAppCache - 初めて見た実アプリケーションの記録
//!
//! Write-once per display name: the first capture wins and later sightings
//! are not recorded again.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::domain::{RosterEntry, SniffedApplication};

#[derive(Default)]
pub struct SniffedAppCache {
    apps: RwLock<BTreeMap<String, SniffedApplication>>,
}

impl SniffedAppCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture `entry` unless its name was seen before.
    ///
    /// Returns the new capture, or `None` if the name is already cached.
    pub fn record(&self, entry: &RosterEntry, at: DateTime<Utc>) -> Option<SniffedApplication> {
        if self.contains(&entry.display_name) {
            return None;
        }
        let mut apps = self.apps.write();
        if apps.contains_key(&entry.display_name) {
            return None;
        }
        let captured = SniffedApplication::capture(entry, at);
        apps.insert(entry.display_name.clone(), captured.clone());
        Some(captured)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.apps.read().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<SniffedApplication> {
        self.apps.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.apps.read().keys().cloned().collect()
    }
}
