//! Concurrent event dispatch
//!
//! Each event runs in its own task so a slow platform call for one member
//! never holds up another. The engine guarantees per-pair safety: restrict
//! re-reads the ledger right before acting, and acknowledgements always
//! unrestrict after their write.

use crate::engine::{GateReport, GatekeeperEngine};
use crate::error::{GateError, GateResult};
use covenant_types::GateEvent;
use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Spawns one task per event against a shared engine
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    engine: Arc<GatekeeperEngine>,
}

impl EventDispatcher {
    pub fn new(engine: Arc<GatekeeperEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<GatekeeperEngine> {
        &self.engine
    }

    /// Handle `event` in a new task
    pub fn dispatch(&self, event: GateEvent) -> JoinHandle<GateResult<GateReport>> {
        let engine = self.engine.clone();
        tokio::spawn(async move {
            let result = engine.handle(event).await;
            if let Err(e) = &result {
                tracing::warn!(error = %e, "Event rejected");
            }
            result
        })
    }

    /// Handle all events concurrently; results keep the input order
    pub async fn dispatch_all(
        &self,
        events: impl IntoIterator<Item = GateEvent>,
    ) -> Vec<GateResult<GateReport>> {
        let handles: Vec<_> = events.into_iter().map(|e| self.dispatch(e)).collect();

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "Event task failed");
                    Err(GateError::TaskFailed(e.to_string()))
                }
            })
            .collect()
    }
}
