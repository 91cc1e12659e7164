//! LoopbackLauncher - 起動成功時に本物のクライアントを登録する開発用ランチャー
//!
//! Wraps another launcher. When a launch succeeds, a real (non-stub) client
//! named after the application is registered on the `InMemoryBus`, standing
//! in for the application the process would have brought up.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::domain::{ClientMetadata, LaunchError, LaunchId, MessageType, StubDescriptor};
use crate::impls::InMemoryBus;
use crate::ports::{LaunchOutcome, LaunchStatus, LaunchTicket, ProcessLauncher};

#[derive(Clone)]
struct Application {
    name: String,
    capabilities: Vec<MessageType>,
}

pub struct LoopbackLauncher {
    inner: Arc<dyn ProcessLauncher>,
    bus: Arc<InMemoryBus>,
    by_locator: HashMap<String, Application>,
}

impl LoopbackLauncher {
    pub fn new(
        inner: Arc<dyn ProcessLauncher>,
        bus: Arc<InMemoryBus>,
        descriptors: &[StubDescriptor],
    ) -> Self {
        let by_locator = descriptors
            .iter()
            .map(|d| {
                (
                    d.launch_locator.clone(),
                    Application {
                        name: d.name.clone(),
                        capabilities: d.capabilities.clone(),
                    },
                )
            })
            .collect();
        Self {
            inner,
            bus,
            by_locator,
        }
    }
}

#[async_trait]
impl ProcessLauncher for LoopbackLauncher {
    async fn launch(&self, locator: &str) -> Result<LaunchTicket, LaunchError> {
        let ticket = self.inner.launch(locator).await?;
        let application = self.by_locator.get(locator).cloned();
        if application.is_none() {
            warn!(%locator, "no application known for locator, nothing will register");
        }

        let (tx, rx) = oneshot::channel();
        let bus = self.bus.clone();
        let id = ticket.id;
        tokio::spawn(async move {
            let outcome = ticket
                .completion
                .await
                .unwrap_or_else(|_| LaunchOutcome::new(LaunchStatus::Killed));
            if outcome.is_success()
                && let Some(app) = application
            {
                let client = bus.register_real_client(ClientMetadata::named(&app.name), app.capabilities);
                info!(%id, application = %app.name, %client, "application registered on the bus");
            }
            let _ = tx.send(outcome);
        });

        Ok(LaunchTicket { id, completion: rx })
    }

    async fn cancel(&self, id: LaunchId) {
        self.inner.cancel(id).await;
    }
}
