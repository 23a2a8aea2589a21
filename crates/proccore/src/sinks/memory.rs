use super::{SinkError, SpanSink};
use crate::SpanRecord;
use async_trait::async_trait;
use std::sync::Mutex;

/// Keeps every appended record in memory
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<SpanRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SpanRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SpanSink for MemorySink {
    async fn append(&self, record: &SpanRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .map_err(|_| SinkError::Remote("memory sink lock poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }
}
