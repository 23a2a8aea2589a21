use crate::config::{ConfigError, EngineConfig};
use crate::control::ExecutionControl;
use crate::dispatcher::Dispatcher;
use crate::recorder::SpanRecorder;
use crate::registry::ServiceTaskRegistry;
use crate::scheduler::TokenScheduler;
use crate::store::InstanceStore;
use proccore::sinks::{BroadcastSink, SpanSink};
use proccore::{
    export_spans, DataMap, EngineError, InstanceId, InstanceStatus, ProcessDefinition, ProcessLoader, RuntimeError,
    SpanExport, SpanRecord, WorkflowInstance,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Main entry point: deployed definitions, handlers, sinks and the instance store
pub struct ProcessEngine {
    registry: Arc<ServiceTaskRegistry>,
    config: EngineConfig,
    processes: Arc<RwLock<HashMap<String, Arc<ProcessDefinition>>>>,
    store: InstanceStore,
    broadcast: Arc<BroadcastSink>,
    sinks: RwLock<Vec<Arc<dyn SpanSink>>>,
}

impl ProcessEngine {
    /// Create an engine with default settings
    pub fn new(registry: ServiceTaskRegistry) -> Self {
        Self::assemble(Arc::new(registry), EngineConfig::default())
    }

    pub fn with_config(registry: ServiceTaskRegistry, config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_registry(Arc::new(registry), config)
    }

    /// Create an engine around a shared registry. Rejects a config that
    /// `EngineConfig::validate` refuses.
    pub fn with_registry(registry: Arc<ServiceTaskRegistry>, config: EngineConfig) -> Result<Self, ConfigError> {
        let config = config.validate()?;
        Ok(Self::assemble(registry, config))
    }

    fn assemble(registry: Arc<ServiceTaskRegistry>, config: EngineConfig) -> Self {
        let broadcast = Arc::new(BroadcastSink::new(config.span_buffer_size));
        tracing::info!(
            handlers = registry.len(),
            max_parallel_branches = config.max_parallel_branches,
            "Process engine ready"
        );
        Self {
            registry,
            config,
            processes: Arc::new(RwLock::new(HashMap::new())),
            store: InstanceStore::new(),
            broadcast,
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ServiceTaskRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &InstanceStore {
        &self.store
    }

    /// Loader validating against this engine's handlers
    pub fn loader(&self) -> ProcessLoader<'_> {
        ProcessLoader::new(self.registry.as_ref())
    }

    /// Deploy a loaded definition, replacing any with the same id
    pub async fn deploy(&self, definition: ProcessDefinition) -> Arc<ProcessDefinition> {
        let definition = Arc::new(definition);
        let previous = self
            .processes
            .write()
            .await
            .insert(definition.id().to_string(), definition.clone());
        match previous {
            Some(_) => tracing::info!("Redeployed process {}", definition.id()),
            None => tracing::info!("Deployed process {} ({} nodes)", definition.id(), definition.node_count()),
        }
        definition
    }

    pub async fn deploy_json(&self, json: &str) -> Result<Arc<ProcessDefinition>, EngineError> {
        let definition = self.loader().load_json(json)?;
        Ok(self.deploy(definition).await)
    }

    pub async fn deploy_file(&self, path: impl AsRef<Path>) -> Result<Arc<ProcessDefinition>, EngineError> {
        let definition = self.loader().load_file(path)?;
        Ok(self.deploy(definition).await)
    }

    pub async fn definition(&self, process_id: &str) -> Option<Arc<ProcessDefinition>> {
        self.processes.read().await.get(process_id).cloned()
    }

    /// Deployed definitions, sorted by id
    pub async fn list(&self) -> Vec<Arc<ProcessDefinition>> {
        let mut definitions: Vec<_> = self.processes.read().await.values().cloned().collect();
        definitions.sort_by(|a, b| a.id().cmp(b.id()));
        definitions
    }

    pub async fn undeploy(&self, process_id: &str) -> bool {
        let removed = self.processes.write().await.remove(process_id).is_some();
        if removed {
            tracing::info!("Undeployed process {}", process_id);
        }
        removed
    }

    /// Attach a sink receiving every span of every later execution
    pub async fn add_sink(&self, sink: Arc<dyn SpanSink>) {
        self.sinks.write().await.push(sink);
    }

    /// Live span feed across all instances
    pub fn subscribe_spans(&self) -> broadcast::Receiver<SpanRecord> {
        self.broadcast.subscribe()
    }

    /// Execute a deployed process by id
    pub async fn execute(&self, process_id: &str, data: DataMap) -> Result<ExecutionResponse, EngineError> {
        self.execute_with_control(process_id, data, ExecutionControl::new())
            .await
    }

    pub async fn execute_with_control(
        &self,
        process_id: &str,
        data: DataMap,
        control: ExecutionControl,
    ) -> Result<ExecutionResponse, EngineError> {
        let definition = self
            .definition(process_id)
            .await
            .ok_or_else(|| EngineError::ProcessNotFound(process_id.to_string()))?;
        Ok(self.run(definition, data, control).await)
    }

    /// Execute a definition directly (without deployment)
    pub async fn run(
        &self,
        definition: Arc<ProcessDefinition>,
        data: DataMap,
        control: ExecutionControl,
    ) -> ExecutionResponse {
        let instance = WorkflowInstance::new(definition.id(), data);

        let mut sinks: Vec<Arc<dyn SpanSink>> = vec![self.broadcast.clone()];
        sinks.extend(self.sinks.read().await.iter().cloned());
        let recorder = SpanRecorder::new(instance.id, sinks);

        let dispatcher = Dispatcher::new(self.registry.clone(), self.config.task_timeout());
        let scheduler = TokenScheduler::new(
            definition,
            instance,
            dispatcher,
            self.config.clone(),
            control,
            self.store.clone(),
            recorder,
        );

        let (instance, spans) = scheduler.run().await;
        ExecutionResponse::new(instance, spans)
    }
}

/// Outcome of one execution request
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResponse {
    pub instance_id: InstanceId,
    pub process_id: String,
    pub status: InstanceStatus,
    pub data: DataMap,
    pub failure: Option<RuntimeError>,
    pub spans: Vec<SpanRecord>,
}

impl ExecutionResponse {
    fn new(instance: WorkflowInstance, spans: Vec<SpanRecord>) -> Self {
        Self {
            instance_id: instance.id,
            process_id: instance.definition_id.clone(),
            status: instance.status(),
            failure: instance.failure.clone(),
            data: instance.data,
            spans,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == InstanceStatus::Completed
    }

    pub fn error_code(&self) -> Option<&str> {
        self.failure.as_ref().and_then(RuntimeError::error_code)
    }

    /// Spans recorded for one node, in order
    pub fn spans_for<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a SpanRecord> + 'a {
        self.spans.iter().filter(move |s| s.node_id == node_id)
    }

    pub fn export_spans(&self) -> Vec<SpanExport> {
        export_spans(&self.spans)
    }

    /// Consumer-facing report with exported spans
    pub fn report(&self) -> ExecutionReport {
        ExecutionReport {
            instance_id: self.instance_id,
            process_id: self.process_id.clone(),
            status: self.status,
            data: self.data.clone(),
            failure: self.failure.clone(),
            error_code: self.error_code().map(String::from),
            spans: self.export_spans(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub instance_id: InstanceId,
    pub process_id: String,
    pub status: InstanceStatus,
    pub data: DataMap,
    pub failure: Option<RuntimeError>,
    pub error_code: Option<String>,
    pub spans: Vec<SpanExport>,
}
