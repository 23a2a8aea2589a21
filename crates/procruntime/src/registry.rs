use async_trait::async_trait;
use proccore::{is_valid_handler_name, HandlerCatalog, HandlerMetadata, Outcome, ServiceHandler, TaskContext};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Registry of service task handlers, keyed by handler name
pub struct ServiceTaskRegistry {
    handlers: HashMap<String, Arc<dyn ServiceHandler>>,
}

impl ServiceTaskRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler; a later registration under the same name wins
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ServiceHandler>) {
        let name = name.into();
        if !is_valid_handler_name(&name) {
            tracing::warn!("Handler name '{}' is not a valid task reference", name);
        }
        tracing::info!("Registering handler: {}", name);
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!("Handler '{}' replaced", name);
        }
    }

    /// Register a synchronous function, run on the async runtime
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(TaskContext) -> Outcome + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnHandler(f)));
    }

    /// Register an async function
    pub fn register_async_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        self.register(name, Arc::new(AsyncFnHandler(f)));
    }

    /// Register a function that blocks; each call runs on the blocking pool
    pub fn register_blocking_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(TaskContext) -> Outcome + Send + Sync + 'static,
    {
        self.register(name, Arc::new(BlockingFnHandler(Arc::new(f))));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ServiceHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered handler names, sorted
    pub fn list_handlers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn metadata(&self, name: &str) -> Option<HandlerMetadata> {
        self.handlers.get(name).map(|h| h.metadata())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for ServiceTaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerCatalog for ServiceTaskRegistry {
    fn contains_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> ServiceHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Outcome + Send + Sync + 'static,
{
    async fn handle(&self, ctx: TaskContext) -> Outcome {
        (self.0)(ctx)
    }
}

struct AsyncFnHandler<F>(F);

#[async_trait]
impl<F, Fut> ServiceHandler for AsyncFnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    async fn handle(&self, ctx: TaskContext) -> Outcome {
        (self.0)(ctx).await
    }
}

struct BlockingFnHandler<F>(Arc<F>);

#[async_trait]
impl<F> ServiceHandler for BlockingFnHandler<F>
where
    F: Fn(TaskContext) -> Outcome + Send + Sync + 'static,
{
    async fn handle(&self, ctx: TaskContext) -> Outcome {
        let f = self.0.clone();
        match tokio::task::spawn_blocking(move || f(ctx)).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Outcome::fatal("handler panicked"),
            Err(e) => Outcome::fatal(format!("blocking handler did not finish: {}", e)),
        }
    }
}
