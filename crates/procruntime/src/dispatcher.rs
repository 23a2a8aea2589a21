use crate::registry::ServiceTaskRegistry;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use proccore::{Outcome, TaskContext};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle};

/// A handler attempt with its timing
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Runs service task handlers on spawned tasks under a timeout
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ServiceTaskRegistry>,
    default_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<ServiceTaskRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
        }
    }

    /// Start one attempt. The handler is spawned immediately; the returned
    /// future resolves to its classified result and aborts it when dropped.
    pub fn dispatch(
        &self,
        handler_name: &str,
        ctx: TaskContext,
        timeout: Option<Duration>,
    ) -> BoxFuture<'static, Dispatched> {
        let limit = timeout.unwrap_or(self.default_timeout);
        let handler_name = handler_name.to_string();
        let started_at = Utc::now();
        let clock = Instant::now();
        let deadline = tokio::time::Instant::now() + limit;

        let task = self
            .registry
            .get(&handler_name)
            .map(|handler| AbortOnDrop(tokio::spawn(async move { handler.handle(ctx).await })));

        async move {
            let outcome = match task {
                Some(mut task) => match tokio::time::timeout_at(deadline, &mut task).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => classify_join_error(&handler_name, e),
                    Err(_) => {
                        tracing::warn!("Handler {} timed out after {:?}", handler_name, limit);
                        Outcome::retry("timeout")
                    }
                },
                None => Outcome::fatal(format!("handler '{}' is not registered", handler_name)),
            };

            Dispatched {
                outcome,
                started_at,
                duration_ms: clock.elapsed().as_millis() as u64,
            }
        }
        .boxed()
    }
}

fn classify_join_error(handler_name: &str, error: JoinError) -> Outcome {
    if error.is_panic() {
        let payload = error.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!("Handler {} panicked: {}", handler_name, message);
        Outcome::fatal(format!("handler panicked: {}", message))
    } else {
        Outcome::fatal("handler was aborted")
    }
}

/// Aborts the spawned task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proccore::DataMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    fn ctx() -> TaskContext {
        TaskContext {
            instance_id: Uuid::new_v4(),
            process_id: "p".to_string(),
            node_id: "task".to_string(),
            attempt: 1,
            retry_count: 0,
            data: DataMap::new(),
        }
    }

    fn dispatcher(registry: ServiceTaskRegistry) -> Dispatcher {
        Dispatcher::new(Arc::new(registry), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_success_is_timed() {
        let mut registry = ServiceTaskRegistry::new();
        registry.register_async_fn("slowish", |_| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Outcome::success()
        });
        let done = dispatcher(registry).dispatch("slowish", ctx(), None).await;
        assert_eq!(done.outcome, Outcome::success());
        assert!(done.duration_ms >= 20);
    }

    #[tokio::test]
    async fn test_timeout_is_retryable_and_aborts() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let mut registry = ServiceTaskRegistry::new();
        registry.register_async_fn("hang", move |_| {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                flag.store(true, Ordering::SeqCst);
                Outcome::success()
            }
        });

        let done = dispatcher(registry)
            .dispatch("hang", ctx(), Some(Duration::from_millis(30)))
            .await;
        assert_eq!(done.outcome, Outcome::retry("timeout"));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!finished.load(Ordering::SeqCst), "timed out handler keeps running");
    }

    #[tokio::test]
    async fn test_panic_is_fatal() {
        let mut registry = ServiceTaskRegistry::new();
        registry.register_fn("boom", |_| panic!("kaboom"));
        let done = dispatcher(registry).dispatch("boom", ctx(), None).await;
        assert_eq!(done.outcome, Outcome::fatal("handler panicked: kaboom"));
    }

    #[tokio::test]
    async fn test_unknown_handler_is_fatal() {
        let done = dispatcher(ServiceTaskRegistry::new()).dispatch("ghost", ctx(), None).await;
        assert!(matches!(done.outcome, Outcome::FatalFailure(_)));
    }
}
