// crates/procruntime/tests/failure_test.rs

mod common;

use common::{data, engine_with, parallel_config, visited};
use proccore::{
    AttributeValue, EngineError, InstanceStatus, Outcome, ProcessDescription, ProcessLoader, RuntimeError,
    SpanStatus, Violation, WorkflowInstance,
};
use procruntime::{
    ConfigError, Dispatcher, EngineConfig, ExecutionControl, InstanceStore, ProcessEngine, ServiceTaskRegistry,
    SpanRecorder, TokenScheduler,
};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn single_task(handler: &str, max_retries: u32) -> ProcessDescription {
    ProcessDescription::new("single")
        .start("start")
        .task("work", handler, max_retries)
        .end("done")
        .flow("f1", "start", "work")
        .flow("f2", "work", "done")
}

fn counting(registry: &mut ServiceTaskRegistry, name: &str, outcome: Outcome) -> Arc<AtomicU32> {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    registry.register_fn(name, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        outcome.clone()
    });
    calls
}

#[tokio::test]
async fn test_retries_exhausted_after_max_plus_one_attempts() {
    let mut registry = ServiceTaskRegistry::new();
    let calls = counting(&mut registry, "always_down", Outcome::retry("connection refused"));
    let (engine, _) = engine_with(registry, EngineConfig::default(), &single_task("always_down", 2)).await;

    let response = engine.execute("single", data(json!({}))).await.unwrap();

    assert_eq!(response.status, InstanceStatus::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match response.failure.as_ref().unwrap() {
        RuntimeError::Fatal {
            node_id,
            reason,
            attempts,
        } => {
            assert_eq!(node_id, "work");
            assert_eq!(reason, "retries exhausted: connection refused");
            assert_eq!(*attempts, 3);
        }
        other => panic!("expected fatal failure, got {:?}", other),
    }

    let retry_counts: Vec<_> = response
        .spans_for("work")
        .map(|s| s.attribute("retry_count").and_then(AttributeValue::as_i64))
        .collect();
    assert_eq!(retry_counts, vec![Some(0), Some(1), Some(2)]);
    assert!(response.spans.iter().all(|s| s.status == SpanStatus::Error));
}

#[tokio::test]
async fn test_fatal_failure_is_not_retried() {
    let mut registry = ServiceTaskRegistry::new();
    let calls = counting(&mut registry, "broken", Outcome::fatal("card declined"));
    let (engine, _) = engine_with(registry, EngineConfig::default(), &single_task("broken", 5)).await;

    let response = engine.execute("single", data(json!({}))).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let failure = response.failure.unwrap();
    assert_eq!(failure.kind(), "fatal");
    assert_eq!(failure.attempts(), 1);
    assert_eq!(visited(&response.spans), vec!["work"]);
}

#[tokio::test]
async fn test_handler_timeout_is_retried() {
    let mut registry = ServiceTaskRegistry::new();
    registry.register_async_fn("sluggish", |ctx| async move {
        if ctx.attempt == 1 {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Outcome::success().with_output("attempt", ctx.attempt)
    });
    let description = ProcessDescription::new("single")
        .start("start")
        .timed_task("work", "sluggish", 1, 50)
        .end("done")
        .flow("f1", "start", "work")
        .flow("f2", "work", "done");
    let (engine, _) = engine_with(registry, EngineConfig::default(), &description).await;

    let response = engine.execute("single", data(json!({}))).await.unwrap();

    assert_eq!(response.status, InstanceStatus::Completed);
    let attempts: Vec<_> = response.spans_for("work").collect();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].attribute("error").and_then(AttributeValue::as_str), Some("timeout"));
    assert!(attempts[0].duration_ms < 500);
    assert_eq!(response.data.get("attempt"), Some(&proccore::Value::Int(2)));
}

#[tokio::test]
async fn test_engine_default_timeout_applies() {
    let mut registry = ServiceTaskRegistry::new();
    registry.register_async_fn("hang", |_| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Outcome::success()
    });
    let config = EngineConfig {
        task_timeout_ms: 40,
        ..EngineConfig::default()
    };
    let (engine, _) = engine_with(registry, config, &single_task("hang", 0)).await;

    let response = engine.execute("single", data(json!({}))).await.unwrap();

    let failure = response.failure.unwrap();
    assert_eq!(failure.kind(), "fatal");
    assert!(failure.to_string().contains("retries exhausted: timeout"));
}

#[tokio::test]
async fn test_panicking_handler_is_fatal() {
    let mut registry = ServiceTaskRegistry::new();
    registry.register_fn("explode", |_| panic!("index out of bounds"));
    let (engine, _) = engine_with(registry, EngineConfig::default(), &single_task("explode", 3)).await;

    let response = engine.execute("single", data(json!({}))).await.unwrap();

    assert_eq!(response.status, InstanceStatus::Failed);
    let failure = response.failure.unwrap();
    assert_eq!(failure.attempts(), 1);
    assert!(failure.to_string().contains("handler panicked"));
}

/// fork -> a -> merge, fork -> b -> route -> (merge | skipped)
fn partial_join() -> ProcessDescription {
    ProcessDescription::new("stall")
        .start("start")
        .split("fork")
        .task("a", "quick", 0)
        .task("b", "quick", 0)
        .exclusive("route")
        .join("merge")
        .end("done")
        .end("skipped")
        .flow("f0", "start", "fork")
        .flow("fa", "fork", "a")
        .flow("fb", "fork", "b")
        .flow("ja", "a", "merge")
        .flow("fr", "b", "route")
        .conditional_flow("jb", "route", "merge", "go == true")
        .default_flow("away", "route", "skipped")
        .flow("f9", "merge", "done")
}

#[tokio::test]
async fn test_join_stall_raises_join_timeout() {
    let mut registry = ServiceTaskRegistry::new();
    registry.register_fn("quick", |_| Outcome::success());
    let (engine, _) = engine_with(registry, EngineConfig::default(), &partial_join()).await;

    let response = engine.execute("stall", data(json!({"go": false}))).await.unwrap();

    assert_eq!(response.status, InstanceStatus::Failed);
    let failure = response.failure.as_ref().unwrap();
    assert_eq!(failure.kind(), "join_timeout");
    assert_eq!(failure.node_id(), Some("merge"));
    assert!(failure.to_string().contains("1/2 arrived"));

    let last = response.spans.last().unwrap();
    assert_eq!(last.node_id, "merge");
    assert_eq!(last.status, SpanStatus::Error);
    assert_eq!(last.attribute("error_kind").and_then(AttributeValue::as_str), Some("join_timeout"));
}

#[tokio::test]
async fn test_partial_join_completes_when_both_arrive() {
    let mut registry = ServiceTaskRegistry::new();
    registry.register_fn("quick", |_| Outcome::success());
    let (engine, _) = engine_with(registry, EngineConfig::default(), &partial_join()).await;

    let response = engine.execute("stall", data(json!({"go": true}))).await.unwrap();

    assert_eq!(response.status, InstanceStatus::Completed);
    assert_eq!(response.spans.last().unwrap().node_id, "done");
}

#[tokio::test]
async fn test_join_deadline_elapses_while_branch_runs() {
    let mut registry = ServiceTaskRegistry::new();
    registry.register_fn("quick", |_| Outcome::success());
    registry.register_async_fn("slow", |_| async {
        tokio::time::sleep(Duration::from_millis(400)).await;
        Outcome::success()
    });
    let description = ProcessDescription::new("deadline")
        .start("start")
        .split("fork")
        .task("a", "quick", 0)
        .task("b", "slow", 0)
        .join("merge")
        .end("done")
        .flow("f0", "start", "fork")
        .flow("fa", "fork", "a")
        .flow("fb", "fork", "b")
        .flow("ja", "a", "merge")
        .flow("jb", "b", "merge")
        .flow("f9", "merge", "done");
    let config = EngineConfig {
        join_timeout_ms: 50,
        ..parallel_config(2)
    };
    let (engine, _) = engine_with(registry, config, &description).await;

    let started = std::time::Instant::now();
    let response = engine.execute("deadline", data(json!({}))).await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(400), "slow branch is abandoned");
    let failure = response.failure.as_ref().unwrap();
    assert_eq!(failure.kind(), "join_timeout");
    assert!(failure.to_string().contains("join timeout elapsed"));
    assert_eq!(response.spans_for("b").count(), 0);
}

#[tokio::test]
async fn test_retry_cycle_on_counter_terminates() {
    let mut registry = ServiceTaskRegistry::new();
    registry.register_fn("charge", |ctx| {
        if ctx.retry_count == 0 {
            Outcome::retry("gateway busy")
        } else {
            Outcome::success().with_output("paid", false)
        }
    });
    let description = ProcessDescription::new("cycle")
        .start("start")
        .task("charge", "charge", 1)
        .exclusive("paid?")
        .end("done")
        .error_end("gave_up", "PAYMENT_ABANDONED")
        .flow("f1", "start", "charge")
        .flow("f2", "charge", "paid?")
        .conditional_flow("ok", "paid?", "done", "paid == true")
        .conditional_flow("stop", "paid?", "gave_up", "_retries.charge >= 1")
        .default_flow("again", "paid?", "charge");
    let (engine, _) = engine_with(registry, EngineConfig::default(), &description).await;

    let response = engine.execute("cycle", data(json!({}))).await.unwrap();

    assert_eq!(response.error_code(), Some("PAYMENT_ABANDONED"));
    assert_eq!(visited(&response.spans), vec!["charge", "charge", "paid?", "gave_up"]);
}

#[tokio::test]
async fn test_loop_back_until_condition_holds() {
    let mut registry = ServiceTaskRegistry::new();
    registry.register_fn("poll", |ctx| {
        let polls = ctx.get("polls").and_then(proccore::Value::as_i64).unwrap_or(0);
        Outcome::success().with_output("polls", polls + 1)
    });
    let description = ProcessDescription::new("poller")
        .start("start")
        .task("poll", "poll", 0)
        .exclusive("ready")
        .end("done")
        .flow("f1", "start", "poll")
        .flow("f2", "poll", "ready")
        .conditional_flow("yes", "ready", "done", "polls >= 3")
        .default_flow("no", "ready", "poll");
    let (engine, _) = engine_with(registry, EngineConfig::default(), &description).await;

    let response = engine.execute("poller", data(json!({}))).await.unwrap();

    assert_eq!(response.status, InstanceStatus::Completed);
    assert_eq!(response.spans_for("poll").count(), 3);
    assert_eq!(response.data.get("polls"), Some(&proccore::Value::Int(3)));
}

#[tokio::test]
async fn test_unregistered_handler_is_rejected_at_load() {
    let engine = ProcessEngine::new(ServiceTaskRegistry::new());
    let json = single_task("missing.handler", 0).to_json().unwrap();

    let err = engine.deploy_json(&json).await.unwrap_err();

    match err {
        EngineError::Definition(definition) => {
            assert_eq!(definition.process_id, "single");
            assert!(definition.violations.contains(&Violation::UnregisteredHandler {
                node: "work".to_string(),
                handler: "missing.handler".to_string(),
            }));
        }
        other => panic!("expected definition error, got {:?}", other),
    }
    assert!(engine.list().await.is_empty());
}

#[tokio::test]
async fn test_engine_rejects_zero_parallel_branches() {
    let config = EngineConfig {
        max_parallel_branches: 0,
        ..EngineConfig::default()
    };

    let Err(err) = ProcessEngine::with_config(ServiceTaskRegistry::new(), config) else {
        panic!("zero parallel branches should be rejected");
    };
    assert!(matches!(
        err,
        ConfigError::InvalidValue { ref key, .. } if key == "max_parallel_branches"
    ));
}

#[tokio::test]
async fn test_scheduler_with_zero_parallel_still_runs_tasks() {
    let mut registry = ServiceTaskRegistry::new();
    let calls = counting(&mut registry, "work", Outcome::success().with_output("done", true));
    let registry = Arc::new(registry);

    let definition = ProcessLoader::new(registry.as_ref())
        .load(&single_task("work", 0))
        .unwrap();
    let config = EngineConfig {
        max_parallel_branches: 0,
        ..EngineConfig::default()
    };
    let instance = WorkflowInstance::new(definition.id(), data(json!({})));
    let recorder = SpanRecorder::new(instance.id, Vec::new());
    let scheduler = TokenScheduler::new(
        Arc::new(definition),
        instance,
        Dispatcher::new(registry.clone(), config.task_timeout()),
        config,
        ExecutionControl::new(),
        InstanceStore::new(),
        recorder,
    );

    let (instance, spans) = scheduler.run().await;

    assert_eq!(instance.status(), InstanceStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(visited(&spans), vec!["work", "done"]);
    assert_eq!(instance.data.get("done"), Some(&proccore::Value::Bool(true)));
}
