//! Import format for process definitions.
//!
//! A description is plain data as it arrives from a file or an API call. It
//! is never executed directly: [`crate::ProcessLoader`] validates it and turns
//! it into a [`crate::ProcessDefinition`].

use crate::definition::ParallelMode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDescription {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub start_events: Vec<StartEventSpec>,
    #[serde(default)]
    pub end_events: Vec<EndEventSpec>,
    #[serde(default)]
    pub service_tasks: Vec<ServiceTaskSpec>,
    #[serde(default)]
    pub exclusive_gateways: Vec<ExclusiveGatewaySpec>,
    #[serde(default)]
    pub parallel_gateways: Vec<ParallelGatewaySpec>,
    #[serde(default)]
    pub sequence_flows: Vec<SequenceFlowSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartEventSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndEventSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTaskSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub handler_name: String,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExclusiveGatewaySpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Branches in evaluation order. When empty, the declaration order of
    /// `sequenceFlows` leaving the gateway is used.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outgoing: Vec<GatewayBranchSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayBranchSpec {
    pub flow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelGatewaySpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub mode: ParallelMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceFlowSpec {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl ProcessDescription {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn start(mut self, id: impl Into<String>) -> Self {
        self.start_events.push(StartEventSpec {
            id: id.into(),
            name: None,
        });
        self
    }

    pub fn end(mut self, id: impl Into<String>) -> Self {
        self.end_events.push(EndEventSpec {
            id: id.into(),
            name: None,
            error_code: None,
        });
        self
    }

    pub fn error_end(mut self, id: impl Into<String>, error_code: impl Into<String>) -> Self {
        self.end_events.push(EndEventSpec {
            id: id.into(),
            name: None,
            error_code: Some(error_code.into()),
        });
        self
    }

    pub fn task(mut self, id: impl Into<String>, handler_name: impl Into<String>, max_retries: u32) -> Self {
        self.service_tasks.push(ServiceTaskSpec {
            id: id.into(),
            name: None,
            handler_name: handler_name.into(),
            max_retries,
            timeout_ms: None,
        });
        self
    }

    pub fn timed_task(
        mut self,
        id: impl Into<String>,
        handler_name: impl Into<String>,
        max_retries: u32,
        timeout_ms: u64,
    ) -> Self {
        self.service_tasks.push(ServiceTaskSpec {
            id: id.into(),
            name: None,
            handler_name: handler_name.into(),
            max_retries,
            timeout_ms: Some(timeout_ms),
        });
        self
    }

    pub fn exclusive(mut self, id: impl Into<String>) -> Self {
        self.exclusive_gateways.push(ExclusiveGatewaySpec {
            id: id.into(),
            name: None,
            outgoing: Vec::new(),
        });
        self
    }

    pub fn split(self, id: impl Into<String>) -> Self {
        self.parallel(id, ParallelMode::Split)
    }

    pub fn join(self, id: impl Into<String>) -> Self {
        self.parallel(id, ParallelMode::Join)
    }

    fn parallel(mut self, id: impl Into<String>, mode: ParallelMode) -> Self {
        self.parallel_gateways.push(ParallelGatewaySpec {
            id: id.into(),
            name: None,
            mode,
        });
        self
    }

    pub fn flow(mut self, id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.sequence_flows.push(SequenceFlowSpec {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            condition: None,
            is_default: false,
        });
        self
    }

    pub fn conditional_flow(
        mut self,
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        self.sequence_flows.push(SequenceFlowSpec {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            condition: Some(condition.into()),
            is_default: false,
        });
        self
    }

    pub fn default_flow(mut self, id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.sequence_flows.push(SequenceFlowSpec {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            condition: None,
            is_default: true,
        });
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
