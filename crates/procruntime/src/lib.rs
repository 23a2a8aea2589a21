//! Process execution runtime
//!
//! Handler registry and dispatcher, join barriers, the token scheduler and
//! the engine facade that ties them to deployed definitions and the
//! instance store.

mod barrier;
mod config;
mod control;
mod dispatcher;
mod engine;
mod recorder;
mod registry;
mod scheduler;
mod store;

pub use barrier::{Arrival, BarrierKey, BarrierTable, JoinBarrier};
pub use config::{
    ConfigError, EngineConfig, ENV_JOIN_TIMEOUT_MS, ENV_MAX_PARALLEL_BRANCHES, ENV_SPAN_BUFFER_SIZE,
    ENV_TASK_TIMEOUT_MS,
};
pub use control::{ExecutionControl, Wake};
pub use dispatcher::{Dispatched, Dispatcher};
pub use engine::{ExecutionReport, ExecutionResponse, ProcessEngine};
pub use recorder::SpanRecorder;
pub use registry::ServiceTaskRegistry;
pub use scheduler::TokenScheduler;
pub use store::{InstanceStore, InstanceSummary};
