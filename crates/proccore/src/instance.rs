use crate::{DataMap, NodeId, RuntimeError, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub type InstanceId = Uuid;
pub type TokenId = u64;

/// Reserved data key holding per-node retry counters.
pub const RETRY_COUNTERS_KEY: &str = "_retries";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Suspended,
    Completed,
    Failed,
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceStatus::Completed | InstanceStatus::Failed)
    }

    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;
        matches!(
            (self, next),
            (Running, Suspended) | (Running, Completed) | (Running, Failed) | (Suspended, Running) | (Suspended, Failed)
        )
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Suspended => "suspended",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: InstanceStatus,
    pub to: InstanceStatus,
}

/// One in-flight control-flow thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub current_node: NodeId,
    pub barrier_generation: u64,
    /// Flow the token last travelled; joins count arrivals per flow.
    pub arrived_via: Option<String>,
}

/// Live state of one process execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub definition_id: String,
    pub data: DataMap,
    pub tokens: VecDeque<Token>,
    status: InstanceStatus,
    pub failure_reason: Option<String>,
    pub failure: Option<RuntimeError>,
}

impl WorkflowInstance {
    pub fn new(definition_id: impl Into<String>, data: DataMap) -> Self {
        Self {
            id: Uuid::new_v4(),
            definition_id: definition_id.into(),
            data,
            tokens: VecDeque::new(),
            status: InstanceStatus::Running,
            failure_reason: None,
            failure: None,
        }
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    pub fn transition(&mut self, next: InstanceStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Mark the instance failed and drop every live token.
    pub fn fail(&mut self, error: RuntimeError) -> Result<(), InvalidTransition> {
        self.transition(InstanceStatus::Failed)?;
        self.failure_reason = Some(error.to_string());
        self.failure = Some(error);
        self.tokens.clear();
        Ok(())
    }

    pub fn retry_count(&self, node: &str) -> u32 {
        self.data
            .get(RETRY_COUNTERS_KEY)
            .and_then(|counters| counters.get_segment(node))
            .and_then(Value::as_i64)
            .map(|n| n.max(0) as u32)
            .unwrap_or(0)
    }

    pub fn set_retry_count(&mut self, node: &str, count: u32) {
        let counters = self
            .data
            .entry(RETRY_COUNTERS_KEY.to_string())
            .or_insert_with(|| Value::Object(BTreeMap::new()));
        if !matches!(counters, Value::Object(_)) {
            *counters = Value::Object(BTreeMap::new());
        }
        if let Value::Object(map) = counters {
            map.insert(node.to_string(), Value::from(count));
        }
    }

    /// Apply a handler result key by key.
    pub fn merge(&mut self, patch: DataMap) {
        for (key, value) in patch {
            if key == RETRY_COUNTERS_KEY {
                continue;
            }
            self.data.insert(key, value);
        }
    }
}
