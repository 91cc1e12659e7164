//! BrokerBuilder - ブローカーの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - collaborators are injected as trait objects; the defaults are the
//!   production ones

use std::sync::Arc;

use crate::app::broker::{Broker, BrokerParts};
use crate::catalog::{CatalogError, StubCatalog};
use crate::config::{BrokerConfig, ConfigError};
use crate::impls::{CommandLauncher, NoopEventSink};
use crate::ports::{BusConnector, Clock, EventSink, ProcessLauncher, SystemClock};

/// BrokerBuilder は Broker を構築
///
/// # 使用例
/// ```ignore
/// let broker = BrokerBuilder::new(config)
///     .bus(bus)
///     .expect_stubs(&["AppLauncherTester"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_stubs() で必須のスタブ名を登録
/// - build() 時に「期待集合 ⊆ 選択済み集合」をチェック
pub struct BrokerBuilder {
    config: BrokerConfig,
    catalog: Option<StubCatalog>,
    bus: Option<Arc<dyn BusConnector>>,
    launcher: Option<Arc<dyn ProcessLauncher>>,
    events: Option<Arc<dyn EventSink>>,
    clock: Option<Arc<dyn Clock>>,
    expected_stubs: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no bus connector configured")]
    MissingBus,

    #[error("missing stubs: {0:?}. These applications were expected but are not selected in the catalog.")]
    MissingStubs(Vec<String>),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BrokerBuilder {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            catalog: None,
            bus: None,
            launcher: None,
            events: None,
            clock: None,
            expected_stubs: None,
        }
    }

    /// Use this catalog instead of loading `config.catalog_path`.
    pub fn catalog(mut self, catalog: StubCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn bus(mut self, bus: Arc<dyn BusConnector>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Defaults to a `CommandLauncher` built from `config.launch`.
    pub fn launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Defaults to `NoopEventSink`.
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Stub names that must exist after selection.
    pub fn expect_stubs(mut self, names: &[&str]) -> Self {
        self.expected_stubs = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// # 検証
    /// - config が妥当か
    /// - expect_stubs() で設定されたスタブが全て選択されているか
    pub fn build(self) -> Result<Broker, BuildError> {
        self.config.validate()?;
        let bus = self.bus.ok_or(BuildError::MissingBus)?;
        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => StubCatalog::load(&self.config.catalog_path)?,
        };

        let selected = catalog.selected(&self.config.selected_applications);
        if let Some(expected) = &self.expected_stubs {
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !selected.iter().any(|d| &d.name == *name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingStubs(missing));
            }
        }

        let launcher = self
            .launcher
            .unwrap_or_else(|| Arc::new(CommandLauncher::new(self.config.launch.clone())));

        Ok(Broker::assemble(BrokerParts {
            config: self.config,
            catalog: Arc::new(catalog),
            selected,
            bus,
            launcher,
            events: self.events.unwrap_or_else(|| Arc::new(NoopEventSink)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        }))
    }
}
