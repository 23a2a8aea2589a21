// crates/proccore/tests/loader_test.rs

use proccore::{DefinitionError, NodeKind, ProcessDescription, ProcessLoader, Violation};
use std::collections::HashSet;

fn handlers() -> HashSet<String> {
    ["validate", "charge", "ship"].iter().map(|s| s.to_string()).collect()
}

fn load(description: &ProcessDescription) -> Result<proccore::ProcessDefinition, DefinitionError> {
    let catalog = handlers();
    ProcessLoader::new(&catalog).load(description)
}

fn order_process() -> ProcessDescription {
    ProcessDescription::new("order")
        .start("start")
        .task("validate", "validate", 0)
        .exclusive("check")
        .task("charge", "charge", 2)
        .end("done")
        .error_end("rejected", "ORDER_REJECTED")
        .flow("f1", "start", "validate")
        .flow("f2", "validate", "check")
        .conditional_flow("f3", "check", "charge", "valid == true")
        .default_flow("f4", "check", "rejected")
        .flow("f5", "charge", "done")
}

#[test]
fn test_valid_process_loads() {
    let definition = load(&order_process()).unwrap();

    assert_eq!(definition.id(), "order");
    assert_eq!(definition.node_count(), 6);
    assert_eq!(definition.start_nodes(), &["start".to_string()]);
    assert_eq!(definition.incoming_count("check"), 1);

    match &definition.node("rejected").unwrap().kind {
        NodeKind::EndEvent { error_code } => assert_eq!(error_code.as_deref(), Some("ORDER_REJECTED")),
        other => panic!("unexpected kind {:?}", other),
    }
}

#[test]
fn test_all_violations_are_collected() {
    let description = ProcessDescription::new("broken")
        .start("start")
        .task("a", "validate", 0)
        .task("a", "charge", 0)
        .end("end")
        .flow("f1", "start", "a")
        .flow("f1", "a", "end")
        .flow("f2", "a", "ghost");

    let err = load(&description).unwrap_err();

    assert_eq!(err.process_id, "broken");
    assert!(err.violations.contains(&Violation::DuplicateNode("a".to_string())));
    assert!(err.violations.contains(&Violation::DuplicateFlow("f1".to_string())));
    assert!(err.violations.contains(&Violation::DanglingTarget {
        flow: "f2".to_string(),
        node: "ghost".to_string(),
    }));
    assert!(err.violations.len() >= 3);
}

#[test]
fn test_unregistered_and_malformed_handlers() {
    let description = ProcessDescription::new("handlers")
        .start("start")
        .task("a", "refund", 0)
        .task("b", "not valid", 0)
        .end("end")
        .flow("f1", "start", "a")
        .flow("f2", "a", "b")
        .flow("f3", "b", "end");

    let err = load(&description).unwrap_err();

    assert!(err.violations.contains(&Violation::UnregisteredHandler {
        node: "a".to_string(),
        handler: "refund".to_string(),
    }));
    assert!(err.violations.contains(&Violation::InvalidHandlerName {
        node: "b".to_string(),
        handler: "not valid".to_string(),
    }));
}

#[test]
fn test_missing_start_event() {
    let description = ProcessDescription::new("headless")
        .task("a", "validate", 0)
        .end("end")
        .flow("f1", "a", "end");

    let err = load(&description).unwrap_err();
    assert!(err.violations.contains(&Violation::NoStartEvent));
}

#[test]
fn test_unreachable_node() {
    let description = order_process().end("orphan");

    let err = load(&description).unwrap_err();
    assert_eq!(err.violations, vec![Violation::Unreachable("orphan".to_string())]);
}

#[test]
fn test_task_with_two_outgoing_flows() {
    let description = order_process().flow("f6", "validate", "done");

    let err = load(&description).unwrap_err();
    assert!(err.violations.iter().any(|v| matches!(
        v,
        Violation::OutgoingCount { node, actual: 2, .. } if node == "validate"
    )));
}

#[test]
fn test_gateway_needs_resolvable_branches() {
    let description = ProcessDescription::new("gateway")
        .start("start")
        .exclusive("gw")
        .end("a")
        .end("b")
        .flow("f1", "start", "gw")
        .flow("f2", "gw", "a")
        .flow("f3", "gw", "b");

    let err = load(&description).unwrap_err();
    assert!(err
        .violations
        .iter()
        .any(|v| matches!(v, Violation::UnresolvableGateway { node, .. } if node == "gw")));
}

#[test]
fn test_two_defaults_rejected() {
    let description = ProcessDescription::new("defaults")
        .start("start")
        .exclusive("gw")
        .end("a")
        .end("b")
        .flow("f1", "start", "gw")
        .default_flow("f2", "gw", "a")
        .default_flow("f3", "gw", "b");

    let err = load(&description).unwrap_err();
    assert!(err
        .violations
        .iter()
        .any(|v| matches!(v, Violation::UnresolvableGateway { reason, .. } if reason.contains("2 default"))));
}

#[test]
fn test_condition_outside_gateway_and_bad_syntax() {
    let description = ProcessDescription::new("conditions")
        .start("start")
        .exclusive("gw")
        .end("a")
        .end("b")
        .conditional_flow("f1", "start", "gw", "x > 1")
        .conditional_flow("f2", "gw", "a", "amount >")
        .default_flow("f3", "gw", "b");

    let err = load(&description).unwrap_err();
    assert!(err
        .violations
        .contains(&Violation::MisplacedCondition { flow: "f1".to_string() }));
    assert!(err
        .violations
        .iter()
        .any(|v| matches!(v, Violation::InvalidCondition { flow, .. } if flow == "f2")));
}

#[test]
fn test_deeply_nested_condition_is_rejected() {
    let nested = format!("{}amount > 1{}", "(".repeat(3000), ")".repeat(3000));
    let description = ProcessDescription::new("nested")
        .start("start")
        .exclusive("gw")
        .end("a")
        .end("b")
        .flow("f1", "start", "gw")
        .conditional_flow("f2", "gw", "a", nested)
        .default_flow("f3", "gw", "b");

    let err = load(&description).unwrap_err();
    assert!(err.violations.iter().any(|v| matches!(
        v,
        Violation::InvalidCondition { flow, message } if flow == "f2" && message.contains("nested too deeply")
    )));
}

#[test]
fn test_parallel_gateways_and_join_incoming() {
    let description = ProcessDescription::new("fanout")
        .start("start")
        .split("fork")
        .task("a", "charge", 0)
        .task("b", "ship", 0)
        .join("sync")
        .end("end")
        .flow("f1", "start", "fork")
        .flow("f2", "fork", "a")
        .flow("f3", "fork", "b")
        .flow("f4", "a", "sync")
        .flow("f5", "b", "sync")
        .flow("f6", "sync", "end");

    let definition = load(&description).unwrap();
    assert_eq!(definition.incoming_count("sync"), 2);
    assert_eq!(definition.outgoing("fork").count(), 2);
}

#[test]
fn test_violation_messages_render() {
    let err = load(&order_process().end("orphan")).unwrap_err();
    let rendered = err.to_string();
    assert!(rendered.contains("Invalid process definition 'order'"));
    assert!(rendered.contains("Node 'orphan' is not reachable from any start event"));
}
