// crates/proccore/src/sinks/mod.rs

mod broadcast;
mod file;
mod iggy;
mod memory;

pub use broadcast::BroadcastSink;
pub use file::JsonLinesSink;
pub use self::iggy::{
    IggySinkConfig, IggySinkError, IggySpanSink, IggySpanSubscription, ENV_IGGY_STREAM, ENV_IGGY_TOPIC, ENV_IGGY_URL,
};
pub use memory::MemorySink;

use crate::SpanRecord;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Remote collector error: {0}")]
    Remote(String),
}

/// Destination for span records. The engine only ever appends.
#[async_trait]
pub trait SpanSink: Send + Sync {
    async fn append(&self, record: &SpanRecord) -> Result<(), SinkError>;

    /// Optional: push buffered records out
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
