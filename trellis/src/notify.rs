use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::pipeline::state::DocStatus;

/// Live-progress notification port. Publishing is best-effort: callers are
/// expected to swallow failures, never to fail the pipeline on them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, channel: &str, message: Value) -> Result<()>;
}

/// State-change event emitted at every pipeline checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChangeEvent {
    pub document_id: String,
    pub old_status: DocStatus,
    pub new_status: DocStatus,
    pub tenant_id: String,
    pub progress: u8,
}

impl StateChangeEvent {
    pub fn channel(tenant_id: &str) -> String {
        format!("documents:{tenant_id}")
    }
}

/// Publishes events as structured log lines; the default adapter for the
/// worker binary.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn publish(&self, channel: &str, message: Value) -> Result<()> {
        info!(%channel, %message, "event published");
        Ok(())
    }
}

/// Captures published events in memory; used by tests.
#[derive(Default)]
pub struct CapturingNotifier {
    events: Mutex<Vec<(String, Value)>>,
}

impl CapturingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn publish(&self, channel: &str, message: Value) -> Result<()> {
        self.events
            .lock()
            .await
            .push((channel.to_string(), message));
        Ok(())
    }
}

/// Publish without propagating errors; the degraded path only logs.
pub async fn publish_best_effort(notifier: &Arc<dyn Notifier>, channel: &str, message: Value) {
    if let Err(err) = notifier.publish(channel, message).await {
        warn!(error = %err, %channel, "failed to publish notification");
    }
}
