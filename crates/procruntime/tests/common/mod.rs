// crates/procruntime/tests/common/mod.rs

#![allow(dead_code)]

use proccore::{data_from_json, DataMap, ProcessDefinition, ProcessDescription, SpanRecord};
use procruntime::{EngineConfig, ProcessEngine, ServiceTaskRegistry};
use std::sync::Arc;

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

pub fn data(json: serde_json::Value) -> DataMap {
    data_from_json(json).expect("test data must be a JSON object")
}

pub fn parallel_config(max_parallel_branches: usize) -> EngineConfig {
    EngineConfig {
        max_parallel_branches,
        ..EngineConfig::default()
    }
}

/// Build an engine and deploy one description into it
pub async fn engine_with(
    registry: ServiceTaskRegistry,
    config: EngineConfig,
    description: &ProcessDescription,
) -> (ProcessEngine, Arc<ProcessDefinition>) {
    init_tracing();
    let engine = ProcessEngine::with_config(registry, config).expect("config should be valid");
    let definition = engine
        .loader()
        .load(description)
        .unwrap_or_else(|e| panic!("definition should load: {}", e));
    let definition = engine.deploy(definition).await;
    (engine, definition)
}

pub fn visited(spans: &[SpanRecord]) -> Vec<&str> {
    spans.iter().map(|s| s.node_id.as_str()).collect()
}

pub fn position(spans: &[SpanRecord], node_id: &str) -> usize {
    spans
        .iter()
        .position(|s| s.node_id == node_id)
        .unwrap_or_else(|| panic!("no span for {}", node_id))
}
