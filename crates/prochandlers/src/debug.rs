use async_trait::async_trait;
use proccore::{HandlerMetadata, Outcome, ServiceHandler, TaskContext};

/// Logs the data snapshot it receives; changes nothing
pub struct DebugLogHandler;

impl DebugLogHandler {
    pub const NAME: &'static str = "debug.log";
}

#[async_trait]
impl ServiceHandler for DebugLogHandler {
    async fn handle(&self, ctx: TaskContext) -> Outcome {
        let message = ctx.get_str("message").unwrap_or("(no message)");
        tracing::info!(
            instance_id = %ctx.instance_id,
            node_id = %ctx.node_id,
            attempt = ctx.attempt,
            "DEBUG: {}",
            message
        );

        // Also log all data for visibility
        for (key, value) in &ctx.data {
            tracing::info!("  {}: {}", key, value);
        }

        Outcome::success()
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Logs instance data for debugging".to_string(),
            category: "debug".to_string(),
        }
    }
}
