use super::{SinkError, SpanSink};
use crate::SpanRecord;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Live fan-out of span records to any number of subscribers.
///
/// Records appended while nobody is subscribed are dropped; slow
/// subscribers observe `RecvError::Lagged`.
pub struct BroadcastSink {
    sender: broadcast::Sender<SpanRecord>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpanRecord> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl SpanSink for BroadcastSink {
    async fn append(&self, record: &SpanRecord) -> Result<(), SinkError> {
        let _ = self.sender.send(record.clone());
        Ok(())
    }
}
