//! Core abstractions for the process engine
//!
//! Process definitions and their loader, the condition language, instance
//! and token state, span records and the sinks they flow into. Everything
//! that schedules or executes lives in `procruntime`.

pub mod condition;
mod definition;
mod description;
mod error;
mod instance;
mod loader;
pub mod sinks;
mod span;
mod task;
mod value;

pub use condition::{Condition, ConditionError, Evaluation};
pub use definition::{Node, NodeId, NodeKind, ParallelMode, ProcessDefinition, SequenceFlow};
pub use description::{
    EndEventSpec, ExclusiveGatewaySpec, GatewayBranchSpec, ParallelGatewaySpec, ProcessDescription,
    SequenceFlowSpec, ServiceTaskSpec, StartEventSpec,
};
pub use error::{DefinitionError, EngineError, RuntimeError, Violation};
pub use instance::{
    InstanceId, InstanceStatus, InvalidTransition, Token, TokenId, WorkflowInstance, RETRY_COUNTERS_KEY,
};
pub use loader::{is_valid_handler_name, HandlerCatalog, ProcessLoader};
pub use span::{export_spans, AttributeValue, SpanExport, SpanId, SpanRecord, SpanStatus, TraceId};
pub use task::{HandlerMetadata, Outcome, ServiceHandler, TaskContext};
pub use value::{data_from_json, DataMap, Value};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
