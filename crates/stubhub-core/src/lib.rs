//! stubhub-core
//!
//! Stub-and-forward broker for a publish/subscribe bus: placeholder clients
//! stand in for applications that are not running, queue what is sent to
//! them, start the real application and replay the queue once it shows up.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, descriptor, message, roster, events, errors）
//! - **ports**: 抽象化レイヤー（BusConnector, ProcessLauncher, EventSink, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（stub, reconciler, dispatch, worker, broker, builder）
//! - **impls**: 実装（InMemoryBus, CommandLauncher など）
//! - **config** / **catalog**: 設定と既知アプリケーション一覧の読み込み

pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

#[cfg(test)]
mod testing;

pub use app::{Broker, BrokerBuilder, BrokerHandle, BrokerStatus, Stub};
pub use catalog::{CatalogError, StubCatalog};
pub use config::{BrokerConfig, ConfigError};
