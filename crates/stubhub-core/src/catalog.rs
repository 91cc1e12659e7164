//! Catalog - 既知アプリケーションの一覧
//!
//! `{ "applications": [ StubDescriptor, ... ] }` read once at startup.
//! The whole catalog answers "is this application known?"; only the selected
//! subset gets stubs.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::StubDescriptor;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalog JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate application '{0}' in catalog")]
    Duplicate(String),

    #[error("application #{index} is invalid: {reason}")]
    Invalid { index: usize, reason: String },
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    applications: Vec<StubDescriptor>,
}

#[derive(Debug, Clone, Default)]
pub struct StubCatalog {
    descriptors: Vec<StubDescriptor>,
}

impl StubCatalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        debug!(?path, "loading catalog");
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(content)?;
        Self::new(file.applications)
    }

    /// Validates names and locators and rejects duplicates.
    pub fn new(descriptors: Vec<StubDescriptor>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for (index, descriptor) in descriptors.iter().enumerate() {
            if descriptor.name.trim().is_empty() {
                return Err(CatalogError::Invalid {
                    index,
                    reason: "empty name".to_string(),
                });
            }
            if descriptor.launch_locator.trim().is_empty() {
                return Err(CatalogError::Invalid {
                    index,
                    reason: format!("'{}' has an empty launch locator", descriptor.name),
                });
            }
            if !seen.insert(descriptor.name.as_str()) {
                return Err(CatalogError::Duplicate(descriptor.name.clone()));
            }
        }
        Ok(Self { descriptors })
    }

    pub fn descriptors(&self) -> &[StubDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.descriptors.iter().any(|d| d.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&StubDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Descriptors that get a stub, in catalog order.
    pub fn selected(&self, selection: &Option<Vec<String>>) -> Vec<StubDescriptor> {
        let Some(names) = selection else {
            return self.descriptors.clone();
        };

        for name in names.iter().filter(|n| !self.is_known(n)) {
            warn!(application = %name, "selected application is not in the catalog");
        }
        self.descriptors
            .iter()
            .filter(|d| names.contains(&d.name))
            .cloned()
            .collect()
    }
}
