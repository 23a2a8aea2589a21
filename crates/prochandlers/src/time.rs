use async_trait::async_trait;
use proccore::{HandlerMetadata, Outcome, ServiceHandler, TaskContext};
use tokio::time::{sleep, Duration};

/// Delay for `delay_ms` milliseconds
pub struct DelayHandler;

impl DelayHandler {
    pub const NAME: &'static str = "time.delay";
}

#[async_trait]
impl ServiceHandler for DelayHandler {
    async fn handle(&self, ctx: TaskContext) -> Outcome {
        let delay_ms = ctx
            .get("delay_ms")
            .and_then(|v| v.as_f64())
            .map(|ms| ms.max(0.0) as u64)
            .unwrap_or(1000); // Default to 1 second if not specified

        tracing::debug!("{}: delaying for {}ms", ctx.node_id, delay_ms);
        sleep(Duration::from_millis(delay_ms)).await;

        Outcome::success()
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Delay for delay_ms milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
