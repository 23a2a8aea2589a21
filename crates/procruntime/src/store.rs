use proccore::{InstanceId, InstanceStatus, WorkflowInstance};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Short view of a stored instance
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    pub id: InstanceId,
    pub definition_id: String,
    pub status: InstanceStatus,
    pub live_tokens: usize,
}

/// Snapshots of live and finished instances.
///
/// The scheduler publishes after every advancement; terminal snapshots stay
/// until a caller removes them.
#[derive(Clone, Default)]
pub struct InstanceStore {
    instances: Arc<RwLock<HashMap<InstanceId, WorkflowInstance>>>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, snapshot: WorkflowInstance) {
        self.instances.write().await.insert(snapshot.id, snapshot);
    }

    pub async fn get(&self, id: &InstanceId) -> Option<WorkflowInstance> {
        self.instances.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &InstanceId) -> Option<WorkflowInstance> {
        self.instances.write().await.remove(id)
    }

    pub async fn list(&self) -> Vec<InstanceSummary> {
        let mut summaries: Vec<InstanceSummary> = self
            .instances
            .read()
            .await
            .values()
            .map(|instance| InstanceSummary {
                id: instance.id,
                definition_id: instance.definition_id.clone(),
                status: instance.status(),
                live_tokens: instance.tokens.len(),
            })
            .collect();
        summaries.sort_by(|a, b| a.definition_id.cmp(&b.definition_id).then(a.id.cmp(&b.id)));
        summaries
    }

    pub async fn with_status(&self, status: InstanceStatus) -> Vec<WorkflowInstance> {
        self.instances
            .read()
            .await
            .values()
            .filter(|i| i.status() == status)
            .cloned()
            .collect()
    }

    /// Drop every terminal snapshot; returns how many were removed
    pub async fn purge_terminal(&self) -> usize {
        let mut instances = self.instances.write().await;
        let before = instances.len();
        instances.retain(|_, i| !i.status().is_terminal());
        before - instances.len()
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
