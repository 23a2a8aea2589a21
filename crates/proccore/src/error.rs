use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Every structural problem found while loading one process definition.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct DefinitionError {
    pub process_id: String,
    pub violations: Vec<Violation>,
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid process definition '{}' ({} violation(s))",
            self.process_id,
            self.violations.len()
        )?;
        for violation in &self.violations {
            write!(f, "\n  - {}", violation)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Violation {
    #[error("Malformed definition: {0}")]
    Malformed(String),

    #[error("Process id must not be empty")]
    EmptyProcessId,

    #[error("Duplicate node id: {0}")]
    DuplicateNode(NodeId),

    #[error("Duplicate flow id: {0}")]
    DuplicateFlow(String),

    #[error("Flow '{flow}' references unknown source node '{node}'")]
    DanglingSource { flow: String, node: NodeId },

    #[error("Flow '{flow}' references unknown target node '{node}'")]
    DanglingTarget { flow: String, node: NodeId },

    #[error("Process has no start event")]
    NoStartEvent,

    #[error("Start event '{0}' must not have incoming flows")]
    StartHasIncoming(NodeId),

    #[error("{kind} '{node}' must have {expected} outgoing flow(s), found {actual}")]
    OutgoingCount {
        node: NodeId,
        kind: String,
        expected: String,
        actual: usize,
    },

    #[error("Node '{0}' is not reachable from any start event")]
    Unreachable(NodeId),

    #[error("Exclusive gateway '{node}' has no resolvable branch set: {reason}")]
    UnresolvableGateway { node: NodeId, reason: String },

    #[error("Exclusive gateway '{gateway}' lists flow '{flow}' which does not leave it")]
    UnknownGatewayFlow { gateway: NodeId, flow: String },

    #[error("Flow '{flow}' leaves exclusive gateway '{gateway}' but is not listed in its outgoing set")]
    UnlistedGatewayFlow { gateway: NodeId, flow: String },

    #[error("Flow '{flow}' has both a condition and a default marker")]
    ConditionalDefault { flow: String },

    #[error("Flow '{flow}' carries a condition or default marker but does not leave an exclusive gateway")]
    MisplacedCondition { flow: String },

    #[error("Flow '{flow}' has an invalid condition: {message}")]
    InvalidCondition { flow: String, message: String },

    #[error("Service task '{node}' has malformed handler name '{handler}'")]
    InvalidHandlerName { node: NodeId, handler: String },

    #[error("Service task '{node}' references unregistered handler '{handler}'")]
    UnregisteredHandler { node: NodeId, handler: String },
}

/// Runtime failure attached to a failed instance.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuntimeError {
    #[error("Gateway '{node_id}' has no viable outgoing flow")]
    Gateway { node_id: NodeId },

    #[error("Service task '{node_id}' failed after {attempts} attempt(s): {reason}")]
    Fatal {
        node_id: NodeId,
        reason: String,
        attempts: u32,
    },

    #[error("Parallel join '{node_id}' (generation {generation}) did not complete: {reason}")]
    JoinTimeout {
        node_id: NodeId,
        generation: u64,
        reason: String,
    },

    #[error("End event '{node_id}' raised error code {code}")]
    ErrorEnd { node_id: NodeId, code: String },

    #[error("Instance cancelled")]
    Cancelled { node_id: Option<NodeId> },
}

impl RuntimeError {
    /// Stable error-kind label used in span attributes and exports.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::Gateway { .. } => "gateway",
            RuntimeError::Fatal { .. } => "fatal",
            RuntimeError::JoinTimeout { .. } => "join_timeout",
            RuntimeError::ErrorEnd { .. } => "error_end",
            RuntimeError::Cancelled { .. } => "cancelled",
        }
    }

    pub fn node_id(&self) -> Option<&str> {
        match self {
            RuntimeError::Gateway { node_id }
            | RuntimeError::Fatal { node_id, .. }
            | RuntimeError::JoinTimeout { node_id, .. }
            | RuntimeError::ErrorEnd { node_id, .. } => Some(node_id),
            RuntimeError::Cancelled { node_id } => node_id.as_deref(),
        }
    }

    /// Attempts made by the failing service task; zero for non-task failures.
    pub fn attempts(&self) -> u32 {
        match self {
            RuntimeError::Fatal { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        match self {
            RuntimeError::ErrorEnd { code, .. } => Some(code),
            _ => None,
        }
    }
}
