use proccore::sinks::SpanSink;
use proccore::{Node, SpanRecord, TraceId};
use std::sync::Arc;

/// Append-only span log for one instance.
///
/// Keeps the ordered list for the execution response and forwards each
/// record to every attached sink. A failing sink is logged and skipped.
pub struct SpanRecorder {
    trace_id: TraceId,
    records: Vec<SpanRecord>,
    sinks: Vec<Arc<dyn SpanSink>>,
}

impl SpanRecorder {
    pub fn new(trace_id: TraceId, sinks: Vec<Arc<dyn SpanSink>>) -> Self {
        Self {
            trace_id,
            records: Vec::new(),
            sinks,
        }
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// A span for a node visit carrying the standard node attributes
    pub fn node_span(&self, node: &Node) -> SpanRecord {
        SpanRecord::new(self.trace_id, node.id.clone(), node.kind.type_name())
            .with_attribute("node_id", node.id.as_str())
            .with_attribute("node_name", node.label())
            .with_attribute("node_type", node.kind.type_name())
    }

    pub async fn record(&mut self, record: SpanRecord) {
        tracing::debug!(
            trace_id = %record.trace_id,
            node_id = %record.node_id,
            status = ?record.status,
            "span recorded"
        );
        for sink in &self.sinks {
            if let Err(e) = sink.append(&record).await {
                tracing::warn!("Span sink rejected record {}: {}", record.span_id, e);
            }
        }
        self.records.push(record);
    }

    pub async fn flush(&self) {
        for sink in &self.sinks {
            if let Err(e) = sink.flush().await {
                tracing::warn!("Span sink flush failed: {}", e);
            }
        }
    }

    pub fn records(&self) -> &[SpanRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<SpanRecord> {
        self.records
    }
}
