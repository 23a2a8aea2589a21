use crate::condition::Condition;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub type NodeId = String;

/// Fan-out or fan-in behaviour of a parallel gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParallelMode {
    Split,
    Join,
}

/// What a node does when a token reaches it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum NodeKind {
    StartEvent,
    EndEvent {
        error_code: Option<String>,
    },
    ServiceTask {
        handler_name: String,
        max_retries: u32,
        timeout_ms: Option<u64>,
    },
    ExclusiveGateway,
    ParallelGateway {
        mode: ParallelMode,
    },
}

impl NodeKind {
    /// Node type label used in spans and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::StartEvent => "StartEvent",
            NodeKind::EndEvent { .. } => "EndEvent",
            NodeKind::ServiceTask { .. } => "ServiceTask",
            NodeKind::ExclusiveGateway => "ExclusiveGateway",
            NodeKind::ParallelGateway { .. } => "ParallelGateway",
        }
    }
}

/// Node in a loaded process definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    /// Display label: the name when present, otherwise the id.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Directed edge between two nodes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceFlow {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    pub condition: Option<Condition>,
    pub is_default: bool,
}

/// Immutable, validated process graph.
///
/// Built only by [`crate::ProcessLoader`], which guarantees that every flow
/// endpoint exists, every exclusive gateway has a resolvable branch set and
/// every service task names a registered handler. Definitions are shared
/// between instances behind an `Arc`.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessDefinition {
    id: String,
    name: Option<String>,
    nodes: BTreeMap<NodeId, Node>,
    flows: Vec<SequenceFlow>,
    #[serde(skip)]
    outgoing: HashMap<NodeId, Vec<usize>>,
    #[serde(skip)]
    incoming: HashMap<NodeId, Vec<usize>>,
    #[serde(skip)]
    start_nodes: Vec<NodeId>,
}

impl ProcessDefinition {
    /// `order` gives, per node, the flow indexes in gateway evaluation order;
    /// nodes absent from it use declaration order.
    pub(crate) fn assemble(
        id: String,
        name: Option<String>,
        nodes: BTreeMap<NodeId, Node>,
        flows: Vec<SequenceFlow>,
        order: HashMap<NodeId, Vec<usize>>,
        start_nodes: Vec<NodeId>,
    ) -> Self {
        let mut outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<NodeId, Vec<usize>> = HashMap::new();

        for (index, flow) in flows.iter().enumerate() {
            outgoing.entry(flow.source.clone()).or_default().push(index);
            incoming.entry(flow.target.clone()).or_default().push(index);
        }
        for (node, ordered) in order {
            outgoing.insert(node, ordered);
        }

        Self {
            id,
            name,
            nodes,
            flows,
            outgoing,
            incoming,
            start_nodes,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn flows(&self) -> &[SequenceFlow] {
        &self.flows
    }

    pub fn flow(&self, index: usize) -> &SequenceFlow {
        &self.flows[index]
    }

    /// Outgoing flows of a node, in evaluation order.
    pub fn outgoing(&self, node: &str) -> impl Iterator<Item = &SequenceFlow> {
        self.outgoing
            .get(node)
            .into_iter()
            .flatten()
            .map(move |&index| &self.flows[index])
    }

    pub fn incoming(&self, node: &str) -> impl Iterator<Item = &SequenceFlow> {
        self.incoming
            .get(node)
            .into_iter()
            .flatten()
            .map(move |&index| &self.flows[index])
    }

    /// Number of distinct incoming flows; the arrival count a join waits for.
    pub fn incoming_count(&self, node: &str) -> usize {
        self.incoming.get(node).map(Vec::len).unwrap_or(0)
    }

    pub fn start_nodes(&self) -> &[NodeId] {
        &self.start_nodes
    }
}
