use crate::{DataMap, InstanceId, NodeId, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Work delegated by a service task. Handlers receive a snapshot of the
/// instance data and report one of three outcomes; they never touch the
/// instance directly.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn handle(&self, ctx: TaskContext) -> Outcome;

    /// Optional: description shown by tooling
    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata::default()
    }
}

/// Input passed to a handler for one attempt
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub instance_id: InstanceId,
    pub process_id: String,
    pub node_id: NodeId,
    /// 1-based attempt number
    pub attempt: u32,
    /// Retries already made before this attempt
    pub retry_count: u32,
    pub data: DataMap,
}

impl TaskContext {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// Classified result of one handler attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Keys to merge into instance data
    Success(DataMap),
    RetryableFailure(String),
    FatalFailure(String),
}

impl Outcome {
    pub fn success() -> Self {
        Outcome::Success(DataMap::new())
    }

    pub fn with_output(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        match self {
            Outcome::Success(mut data) => {
                data.insert(key.into(), value.into());
                Outcome::Success(data)
            }
            other => other,
        }
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        Outcome::RetryableFailure(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Outcome::FatalFailure(reason.into())
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::RetryableFailure(_) => "retryable_failure",
            Outcome::FatalFailure(_) => "fatal_failure",
        }
    }
}

/// Metadata about a handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerMetadata {
    pub description: String,
    pub category: String,
}

impl Default for HandlerMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}
