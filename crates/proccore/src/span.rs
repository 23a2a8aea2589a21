use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub type TraceId = Uuid;
pub type SpanId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpanStatus {
    Ok,
    Error,
}

/// Scalar span attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        AttributeValue::Int(n)
    }
}

impl From<u32> for AttributeValue {
    fn from(n: u32) -> Self {
        AttributeValue::Int(n as i64)
    }
}

impl From<u64> for AttributeValue {
    fn from(n: u64) -> Self {
        AttributeValue::Int(n as i64)
    }
}

impl From<usize> for AttributeValue {
    fn from(n: usize) -> Self {
        AttributeValue::Int(n as i64)
    }
}

impl From<f64> for AttributeValue {
    fn from(n: f64) -> Self {
        AttributeValue::Float(n)
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

/// One node visit, as recorded by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub node_id: String,
    pub node_type: String,
    pub start_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: SpanStatus,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl SpanRecord {
    pub fn new(trace_id: TraceId, node_id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            trace_id,
            span_id: Uuid::new_v4(),
            node_id: node_id.into(),
            node_type: node_type.into(),
            start_time: Utc::now(),
            duration_ms: 0,
            status: SpanStatus::Ok,
            attributes: BTreeMap::new(),
        }
    }

    pub fn started_at(mut self, start_time: DateTime<Utc>, duration_ms: u64) -> Self {
        self.start_time = start_time;
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_status(mut self, status: SpanStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn is_error(&self) -> bool {
        self.status == SpanStatus::Error
    }

    /// Consumer-facing representation.
    pub fn export(&self) -> SpanExport {
        SpanExport::from(self)
    }
}

/// Stable export shape consumed by audit and analysis tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanExport {
    pub task: String,
    pub span_id: String,
    pub trace_id: String,
    pub timestamp: String,
    pub duration_ms: u64,
    pub status: SpanStatus,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl From<&SpanRecord> for SpanExport {
    fn from(record: &SpanRecord) -> Self {
        let task = record
            .attributes
            .get("node_name")
            .and_then(AttributeValue::as_str)
            .unwrap_or(&record.node_id)
            .to_string();

        Self {
            task,
            span_id: record.span_id.to_string(),
            trace_id: record.trace_id.to_string(),
            timestamp: record.start_time.to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms: record.duration_ms,
            status: record.status,
            attributes: record.attributes.clone(),
        }
    }
}

/// Export a span list in order.
pub fn export_spans(records: &[SpanRecord]) -> Vec<SpanExport> {
    records.iter().map(SpanExport::from).collect()
}
