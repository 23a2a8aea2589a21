use crate::condition::Condition;
use crate::definition::{Node, NodeId, NodeKind, ParallelMode, ProcessDefinition, SequenceFlow};
use crate::description::ProcessDescription;
use crate::error::{DefinitionError, EngineError, Violation};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

const MAX_HANDLER_NAME_LEN: usize = 128;

/// Answers whether a handler name is registered. Implemented by the runtime registry.
pub trait HandlerCatalog {
    fn contains_handler(&self, name: &str) -> bool;
}

impl HandlerCatalog for HashSet<String> {
    fn contains_handler(&self, name: &str) -> bool {
        self.contains(name)
    }
}

/// Handler names are identifiers with optional `.`/`-` separated namespaces,
/// e.g. `validate`, `http.request`, `billing.charge-card`.
pub fn is_valid_handler_name(name: &str) -> bool {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    head_ok
        && name.len() <= MAX_HANDLER_NAME_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        && !name.ends_with('.')
}

/// Turns process descriptions into validated, immutable definitions.
pub struct ProcessLoader<'a> {
    catalog: &'a dyn HandlerCatalog,
}

impl<'a> ProcessLoader<'a> {
    pub fn new(catalog: &'a dyn HandlerCatalog) -> Self {
        Self { catalog }
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ProcessDefinition, EngineError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Ok(self.load_json(&json)?)
    }

    pub fn load_json(&self, json: &str) -> Result<ProcessDefinition, DefinitionError> {
        let description: ProcessDescription = serde_json::from_str(json).map_err(|e| {
            let process_id = serde_json::from_str::<serde_json::Value>(json)
                .ok()
                .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(String::from))
                .unwrap_or_default();
            DefinitionError {
                process_id,
                violations: vec![Violation::Malformed(e.to_string())],
            }
        })?;
        self.load(&description)
    }

    /// Validate a description, collecting every violation before failing.
    pub fn load(&self, description: &ProcessDescription) -> Result<ProcessDefinition, DefinitionError> {
        let mut violations = Vec::new();

        if description.id.trim().is_empty() {
            violations.push(Violation::EmptyProcessId);
        }

        let (nodes, start_nodes) = self.collect_nodes(description, &mut violations);
        let mut flows = collect_flows(description, &nodes, &mut violations);
        let order = apply_gateway_branches(description, &nodes, &mut flows, &mut violations);

        check_flow_markers(&nodes, &flows, &mut violations);
        normalize_pass_through_gateways(&nodes, &mut flows, &order);
        check_structure(&nodes, &flows, &order, &mut violations);

        if start_nodes.is_empty() {
            violations.push(Violation::NoStartEvent);
        } else {
            check_reachability(&nodes, &flows, &start_nodes, &mut violations);
        }

        if !violations.is_empty() {
            tracing::warn!(
                "Rejected process definition {} with {} violation(s)",
                description.id,
                violations.len()
            );
            return Err(DefinitionError {
                process_id: description.id.clone(),
                violations,
            });
        }

        tracing::debug!(
            "Loaded process definition {} ({} nodes, {} flows)",
            description.id,
            nodes.len(),
            flows.len()
        );

        Ok(ProcessDefinition::assemble(
            description.id.clone(),
            description.name.clone(),
            nodes,
            flows,
            order,
            start_nodes,
        ))
    }

    fn collect_nodes(
        &self,
        description: &ProcessDescription,
        violations: &mut Vec<Violation>,
    ) -> (BTreeMap<NodeId, Node>, Vec<NodeId>) {
        let mut nodes = BTreeMap::new();
        let mut start_nodes = Vec::new();

        for spec in &description.start_events {
            if add_node(&mut nodes, violations, &spec.id, &spec.name, NodeKind::StartEvent) {
                start_nodes.push(spec.id.clone());
            }
        }
        for spec in &description.end_events {
            let kind = NodeKind::EndEvent {
                error_code: spec.error_code.clone(),
            };
            add_node(&mut nodes, violations, &spec.id, &spec.name, kind);
        }
        for spec in &description.service_tasks {
            if !is_valid_handler_name(&spec.handler_name) {
                violations.push(Violation::InvalidHandlerName {
                    node: spec.id.clone(),
                    handler: spec.handler_name.clone(),
                });
            } else if !self.catalog.contains_handler(&spec.handler_name) {
                violations.push(Violation::UnregisteredHandler {
                    node: spec.id.clone(),
                    handler: spec.handler_name.clone(),
                });
            }
            let kind = NodeKind::ServiceTask {
                handler_name: spec.handler_name.clone(),
                max_retries: spec.max_retries,
                timeout_ms: spec.timeout_ms,
            };
            add_node(&mut nodes, violations, &spec.id, &spec.name, kind);
        }
        for spec in &description.exclusive_gateways {
            add_node(&mut nodes, violations, &spec.id, &spec.name, NodeKind::ExclusiveGateway);
        }
        for spec in &description.parallel_gateways {
            let kind = NodeKind::ParallelGateway { mode: spec.mode };
            add_node(&mut nodes, violations, &spec.id, &spec.name, kind);
        }

        (nodes, start_nodes)
    }
}

fn add_node(
    nodes: &mut BTreeMap<NodeId, Node>,
    violations: &mut Vec<Violation>,
    id: &str,
    name: &Option<String>,
    kind: NodeKind,
) -> bool {
    if nodes.contains_key(id) {
        violations.push(Violation::DuplicateNode(id.to_string()));
        return false;
    }
    nodes.insert(
        id.to_string(),
        Node {
            id: id.to_string(),
            name: name.clone(),
            kind,
        },
    );
    true
}

fn parse_condition(flow: &str, source: &str, violations: &mut Vec<Violation>) -> Option<Condition> {
    match Condition::parse(source) {
        Ok(condition) => Some(condition),
        Err(e) => {
            violations.push(Violation::InvalidCondition {
                flow: flow.to_string(),
                message: e.to_string(),
            });
            None
        }
    }
}

/// Flows with dangling endpoints are reported and left out of the graph.
fn collect_flows(
    description: &ProcessDescription,
    nodes: &BTreeMap<NodeId, Node>,
    violations: &mut Vec<Violation>,
) -> Vec<SequenceFlow> {
    let mut seen = HashSet::new();
    let mut flows = Vec::new();

    for spec in &description.sequence_flows {
        if !seen.insert(spec.id.as_str()) {
            violations.push(Violation::DuplicateFlow(spec.id.clone()));
            continue;
        }

        let mut dangling = false;
        if !nodes.contains_key(&spec.source) {
            violations.push(Violation::DanglingSource {
                flow: spec.id.clone(),
                node: spec.source.clone(),
            });
            dangling = true;
        }
        if !nodes.contains_key(&spec.target) {
            violations.push(Violation::DanglingTarget {
                flow: spec.id.clone(),
                node: spec.target.clone(),
            });
            dangling = true;
        }

        let condition = spec
            .condition
            .as_deref()
            .and_then(|source| parse_condition(&spec.id, source, violations));

        if dangling {
            continue;
        }

        flows.push(SequenceFlow {
            id: spec.id.clone(),
            source: spec.source.clone(),
            target: spec.target.clone(),
            condition,
            is_default: spec.is_default,
        });
    }

    flows
}

/// Merge the `outgoing` branch lists of exclusive gateways into their flows
/// and return the resulting evaluation order per gateway.
fn apply_gateway_branches(
    description: &ProcessDescription,
    nodes: &BTreeMap<NodeId, Node>,
    flows: &mut [SequenceFlow],
    violations: &mut Vec<Violation>,
) -> HashMap<NodeId, Vec<usize>> {
    let mut order = HashMap::new();

    for gateway in &description.exclusive_gateways {
        if gateway.outgoing.is_empty() || !nodes.contains_key(&gateway.id) {
            continue;
        }

        let mut listed = Vec::new();
        for branch in &gateway.outgoing {
            let index = flows
                .iter()
                .position(|f| f.id == branch.flow_id && f.source == gateway.id);
            let Some(index) = index else {
                violations.push(Violation::UnknownGatewayFlow {
                    gateway: gateway.id.clone(),
                    flow: branch.flow_id.clone(),
                });
                continue;
            };
            if let Some(source) = &branch.condition {
                flows[index].condition = parse_condition(&branch.flow_id, source, violations);
            }
            if branch.default {
                flows[index].is_default = true;
            }
            if !listed.contains(&index) {
                listed.push(index);
            }
        }

        for (index, flow) in flows.iter().enumerate() {
            if flow.source == gateway.id && !listed.contains(&index) {
                violations.push(Violation::UnlistedGatewayFlow {
                    gateway: gateway.id.clone(),
                    flow: flow.id.clone(),
                });
            }
        }

        order.insert(gateway.id.clone(), listed);
    }

    order
}

fn check_flow_markers(nodes: &BTreeMap<NodeId, Node>, flows: &[SequenceFlow], violations: &mut Vec<Violation>) {
    for flow in flows {
        if flow.condition.is_some() && flow.is_default {
            violations.push(Violation::ConditionalDefault { flow: flow.id.clone() });
        }
        let from_exclusive = matches!(
            nodes.get(&flow.source).map(|n| &n.kind),
            Some(NodeKind::ExclusiveGateway)
        );
        if (flow.condition.is_some() || flow.is_default) && !from_exclusive {
            violations.push(Violation::MisplacedCondition { flow: flow.id.clone() });
        }
    }
}

fn outgoing_indexes(
    node: &str,
    flows: &[SequenceFlow],
    order: &HashMap<NodeId, Vec<usize>>,
) -> Vec<usize> {
    match order.get(node) {
        Some(listed) => listed.clone(),
        None => flows
            .iter()
            .enumerate()
            .filter(|(_, f)| f.source == node)
            .map(|(i, _)| i)
            .collect(),
    }
}

/// An exclusive gateway whose single outgoing flow is unmarked acts as a merge;
/// treat that flow as its default.
fn normalize_pass_through_gateways(
    nodes: &BTreeMap<NodeId, Node>,
    flows: &mut [SequenceFlow],
    order: &HashMap<NodeId, Vec<usize>>,
) {
    for node in nodes.values() {
        if node.kind != NodeKind::ExclusiveGateway {
            continue;
        }
        let outgoing = outgoing_indexes(&node.id, flows, order);
        if let [only] = outgoing.as_slice() {
            let flow = &mut flows[*only];
            if flow.condition.is_none() && !flow.is_default {
                flow.is_default = true;
            }
        }
    }
}

fn check_structure(
    nodes: &BTreeMap<NodeId, Node>,
    flows: &[SequenceFlow],
    order: &HashMap<NodeId, Vec<usize>>,
    violations: &mut Vec<Violation>,
) {
    let count_violation = |node: &Node, expected: &str, actual: usize| Violation::OutgoingCount {
        node: node.id.clone(),
        kind: node.kind.type_name().to_string(),
        expected: expected.to_string(),
        actual,
    };

    for node in nodes.values() {
        let outgoing = outgoing_indexes(&node.id, flows, order);
        let incoming = flows.iter().filter(|f| f.target == node.id).count();

        match &node.kind {
            NodeKind::StartEvent => {
                if incoming > 0 {
                    violations.push(Violation::StartHasIncoming(node.id.clone()));
                }
                if outgoing.len() != 1 {
                    violations.push(count_violation(node, "exactly 1", outgoing.len()));
                }
            }
            NodeKind::ServiceTask { .. } => {
                if outgoing.len() != 1 {
                    violations.push(count_violation(node, "exactly 1", outgoing.len()));
                }
            }
            NodeKind::EndEvent { .. } => {
                if !outgoing.is_empty() {
                    violations.push(count_violation(node, "no", outgoing.len()));
                }
            }
            NodeKind::ParallelGateway { mode: ParallelMode::Split } => {
                if outgoing.is_empty() {
                    violations.push(count_violation(node, "at least 1", 0));
                }
            }
            NodeKind::ParallelGateway { mode: ParallelMode::Join } => {
                if outgoing.len() != 1 {
                    violations.push(count_violation(node, "exactly 1", outgoing.len()));
                }
            }
            NodeKind::ExclusiveGateway => {
                if let Some(reason) = unresolvable_reason(&outgoing, flows) {
                    violations.push(Violation::UnresolvableGateway {
                        node: node.id.clone(),
                        reason,
                    });
                }
            }
        }
    }
}

fn unresolvable_reason(outgoing: &[usize], flows: &[SequenceFlow]) -> Option<String> {
    if outgoing.is_empty() {
        return Some("no outgoing flows".to_string());
    }
    let defaults = outgoing.iter().filter(|&&i| flows[i].is_default).count();
    let conditional = outgoing.iter().filter(|&&i| flows[i].condition.is_some()).count();

    if defaults > 1 {
        return Some(format!("{} default flows, at most one allowed", defaults));
    }
    if conditional == 0 && defaults == 0 {
        return Some("no conditional or default flow".to_string());
    }
    outgoing
        .iter()
        .map(|&i| &flows[i])
        .find(|f| f.condition.is_none() && !f.is_default)
        .map(|f| format!("flow '{}' has neither a condition nor a default marker", f.id))
}

fn check_reachability(
    nodes: &BTreeMap<NodeId, Node>,
    flows: &[SequenceFlow],
    start_nodes: &[NodeId],
    violations: &mut Vec<Violation>,
) {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let index: HashMap<&str, NodeIndex> = nodes
        .keys()
        .map(|id| (id.as_str(), graph.add_node(id.as_str())))
        .collect();

    for flow in flows {
        if let (Some(&from), Some(&to)) = (index.get(flow.source.as_str()), index.get(flow.target.as_str())) {
            graph.add_edge(from, to, ());
        }
    }

    let mut reached = HashSet::new();
    for start in start_nodes {
        let Some(&root) = index.get(start.as_str()) else {
            continue;
        };
        let mut bfs = Bfs::new(&graph, root);
        while let Some(visited) = bfs.next(&graph) {
            reached.insert(visited);
        }
    }

    for id in nodes.keys() {
        if !reached.contains(&index[id.as_str()]) {
            violations.push(Violation::Unreachable(id.clone()));
        }
    }
}
