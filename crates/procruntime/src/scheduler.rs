use crate::barrier::{Arrival, BarrierKey, BarrierTable};
use crate::config::EngineConfig;
use crate::control::{ExecutionControl, Wake};
use crate::dispatcher::{Dispatched, Dispatcher};
use crate::recorder::SpanRecorder;
use crate::store::InstanceStore;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use proccore::{
    InstanceStatus, Node, NodeId, NodeKind, Outcome, ParallelMode, ProcessDefinition, RuntimeError, SpanRecord,
    SpanStatus, TaskContext, Token, TokenId, WorkflowInstance,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Generation shared by the tokens seeded at start events
const ROOT_GENERATION: u64 = 0;

/// A finished handler attempt waiting to be applied
struct Completion {
    token: Token,
    node_id: NodeId,
    handler_name: String,
    attempt: u32,
    retry_count: u32,
    dispatched: Dispatched,
}

/// Drives one instance's tokens through its definition.
///
/// The control loop is the only writer of instance data, the token queue
/// and the join barriers. Handler attempts run on spawned tasks; their
/// results are applied here one at a time.
pub struct TokenScheduler {
    definition: Arc<ProcessDefinition>,
    instance: WorkflowInstance,
    dispatcher: Dispatcher,
    config: EngineConfig,
    control: ExecutionControl,
    store: InstanceStore,
    recorder: SpanRecorder,
    barriers: BarrierTable,
    generation_parents: HashMap<u64, u64>,
    next_token_id: TokenId,
    next_generation: u64,
    in_flight: FuturesUnordered<BoxFuture<'static, Completion>>,
    in_flight_tokens: BTreeMap<TokenId, Token>,
}

impl TokenScheduler {
    pub fn new(
        definition: Arc<ProcessDefinition>,
        instance: WorkflowInstance,
        dispatcher: Dispatcher,
        config: EngineConfig,
        control: ExecutionControl,
        store: InstanceStore,
        recorder: SpanRecorder,
    ) -> Self {
        // zero would never admit a token and the loop would settle early
        let config = EngineConfig {
            max_parallel_branches: config.max_parallel_branches.max(1),
            ..config
        };
        Self {
            definition,
            instance,
            dispatcher,
            config,
            control,
            store,
            recorder,
            barriers: BarrierTable::new(),
            generation_parents: HashMap::new(),
            next_token_id: 0,
            next_generation: ROOT_GENERATION + 1,
            in_flight: FuturesUnordered::new(),
            in_flight_tokens: BTreeMap::new(),
        }
    }

    /// Run until the instance is terminal. Returns the final instance and
    /// every span recorded, in order.
    pub async fn run(mut self) -> (WorkflowInstance, Vec<SpanRecord>) {
        tracing::info!(
            instance_id = %self.instance.id,
            process_id = %self.definition.id(),
            "Instance started"
        );

        self.seed();
        self.publish().await;

        while !self.instance.status().is_terminal() {
            if self.control.is_cancelled() {
                self.cancel().await;
                continue;
            }
            if self.control.is_suspend_requested() {
                self.suspend().await;
                continue;
            }
            if let Some(key) = self.barriers.expired(self.config.join_timeout(), Instant::now()) {
                self.join_timed_out(key, "join timeout elapsed").await;
                continue;
            }

            if self.in_flight.len() < self.config.max_parallel_branches {
                if let Some(token) = self.instance.tokens.pop_front() {
                    self.advance(token).await;
                    self.publish().await;
                    continue;
                }
            }

            if !self.in_flight.is_empty() {
                self.wait_for_completion().await;
                self.publish().await;
                continue;
            }

            self.settle().await;
            self.publish().await;
        }

        self.finish().await
    }

    fn seed(&mut self) {
        let definition = self.definition.clone();
        for start in definition.start_nodes() {
            if let Some(flow) = definition.outgoing(start).next() {
                let token = self.new_token(flow.target.clone(), ROOT_GENERATION, Some(flow.id.clone()));
                tracing::debug!("Seeded token {} at {} from {}", token.id, token.current_node, start);
                self.instance.tokens.push_back(token);
            }
        }
    }

    async fn advance(&mut self, token: Token) {
        let definition = self.definition.clone();
        let Some(node) = definition.node(&token.current_node) else {
            self.fail(RuntimeError::Fatal {
                node_id: token.current_node.clone(),
                reason: "token reached an unknown node".to_string(),
                attempts: 0,
            });
            return;
        };

        tracing::debug!(
            token = token.id,
            node_id = %node.id,
            node_type = node.kind.type_name(),
            "Advancing token"
        );

        match &node.kind {
            NodeKind::StartEvent => self.move_along(token, node),
            NodeKind::ServiceTask {
                handler_name,
                timeout_ms,
                ..
            } => self.dispatch(token, node, handler_name, *timeout_ms),
            NodeKind::ExclusiveGateway => self.decide(token, node).await,
            NodeKind::ParallelGateway {
                mode: ParallelMode::Split,
            } => self.split(token, node).await,
            NodeKind::ParallelGateway {
                mode: ParallelMode::Join,
            } => self.join(token, node).await,
            NodeKind::EndEvent { error_code } => self.end(node, error_code.as_deref()).await,
        }
    }

    fn dispatch(&mut self, token: Token, node: &Node, handler_name: &str, timeout_ms: Option<u64>) {
        let retry_count = self.instance.retry_count(&node.id);
        let attempt = retry_count + 1;
        let ctx = TaskContext {
            instance_id: self.instance.id,
            process_id: self.definition.id().to_string(),
            node_id: node.id.clone(),
            attempt,
            retry_count,
            data: self.instance.data.clone(),
        };

        tracing::debug!("Dispatching {} to handler {} (attempt {})", node.id, handler_name, attempt);
        let attempt_future = self
            .dispatcher
            .dispatch(handler_name, ctx, timeout_ms.map(Duration::from_millis));

        self.in_flight_tokens.insert(token.id, token.clone());
        let node_id = node.id.clone();
        let handler_name = handler_name.to_string();
        self.in_flight.push(
            async move {
                Completion {
                    token,
                    node_id,
                    handler_name,
                    attempt,
                    retry_count,
                    dispatched: attempt_future.await,
                }
            }
            .boxed(),
        );
    }

    /// Wait for the next handler result, a barrier deadline or a cancel
    async fn wait_for_completion(&mut self) {
        let deadline = self.barriers.next_deadline(self.config.join_timeout());
        let expiry_at = deadline.as_ref().map(|(_, at)| *at);
        let expiry = async move {
            match expiry_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        let control = self.control.clone();

        tokio::select! {
            Some(done) = self.in_flight.next() => self.complete(done).await,
            _ = expiry => {
                if let Some((key, _)) = deadline {
                    self.join_timed_out(key, "join timeout elapsed").await;
                }
            }
            _ = control.cancelled() => {}
        }
    }

    async fn complete(&mut self, done: Completion) {
        self.in_flight_tokens.remove(&done.token.id);

        let definition = self.definition.clone();
        let Some(node) = definition.node(&done.node_id) else {
            return;
        };
        let max_retries = match &node.kind {
            NodeKind::ServiceTask { max_retries, .. } => *max_retries,
            _ => 0,
        };

        let Dispatched {
            outcome,
            started_at,
            duration_ms,
        } = done.dispatched;
        let span = self
            .recorder
            .node_span(node)
            .started_at(started_at, duration_ms)
            .with_attribute("handler", done.handler_name.as_str())
            .with_attribute("attempt", done.attempt)
            .with_attribute("retry_count", done.retry_count)
            .with_attribute("max_retries", max_retries)
            .with_attribute("outcome", outcome.label());

        match outcome {
            Outcome::Success(patch) => {
                self.recorder.record(span).await;
                tracing::debug!("Task {} succeeded with {} key(s)", node.id, patch.len());
                self.instance.merge(patch);
                self.move_along(done.token, node);
            }
            Outcome::RetryableFailure(reason) => {
                let span = span.with_status(SpanStatus::Error).with_attribute("error", reason.as_str());
                self.recorder.record(span).await;

                let retries = self.instance.retry_count(&node.id);
                if retries < max_retries {
                    tracing::warn!(
                        "Task {} failed ({}), retry {}/{}",
                        node.id,
                        reason,
                        retries + 1,
                        max_retries
                    );
                    self.instance.set_retry_count(&node.id, retries + 1);
                    self.instance.tokens.push_back(done.token);
                } else {
                    self.fail(RuntimeError::Fatal {
                        node_id: node.id.clone(),
                        reason: format!("retries exhausted: {}", reason),
                        attempts: done.attempt,
                    });
                }
            }
            Outcome::FatalFailure(reason) => {
                let span = span.with_status(SpanStatus::Error).with_attribute("error", reason.as_str());
                self.recorder.record(span).await;
                self.fail(RuntimeError::Fatal {
                    node_id: node.id.clone(),
                    reason,
                    attempts: done.attempt,
                });
            }
        }
    }

    async fn decide(&mut self, token: Token, node: &Node) {
        let started_at = Utc::now();
        let clock = Instant::now();
        let definition = self.definition.clone();

        let mut warnings: Vec<String> = Vec::new();
        let mut chosen = None;
        for flow in definition.outgoing(&node.id) {
            let Some(condition) = &flow.condition else {
                continue;
            };
            let evaluation = condition.evaluate(&self.instance.data);
            for warning in evaluation.warnings {
                if !warnings.contains(&warning) {
                    warnings.push(warning);
                }
            }
            if evaluation.matched {
                chosen = Some(flow);
                break;
            }
        }
        let chosen = chosen.or_else(|| definition.outgoing(&node.id).find(|f| f.is_default));

        let mut span = self.timed_span(node, started_at, clock);
        if !warnings.is_empty() {
            for warning in &warnings {
                tracing::warn!("Gateway {}: {}", node.id, warning);
            }
            span = span.with_attribute("warning", warnings.join("; "));
        }

        match chosen {
            Some(flow) => {
                let via = flow
                    .condition
                    .as_ref()
                    .map(|c| c.source().to_string())
                    .unwrap_or_else(|| "default".to_string());
                let span = span
                    .with_attribute("chosen_flow", flow.id.as_str())
                    .with_attribute("condition", via);
                self.recorder.record(span).await;
                tracing::debug!("Gateway {} took {}", node.id, flow.id);
                self.instance.tokens.push_back(Token {
                    current_node: flow.target.clone(),
                    arrived_via: Some(flow.id.clone()),
                    ..token
                });
            }
            None => {
                let error = RuntimeError::Gateway {
                    node_id: node.id.clone(),
                };
                let span = span
                    .with_status(SpanStatus::Error)
                    .with_attribute("error_kind", error.kind())
                    .with_attribute("error", error.to_string());
                self.recorder.record(span).await;
                self.fail(error);
            }
        }
    }

    async fn split(&mut self, token: Token, node: &Node) {
        let started_at = Utc::now();
        let clock = Instant::now();
        let definition = self.definition.clone();

        let generation = self.next_generation;
        self.next_generation += 1;
        self.generation_parents.insert(generation, token.barrier_generation);

        let branches: Vec<Token> = definition
            .outgoing(&node.id)
            .map(|flow| Token {
                id: 0,
                current_node: flow.target.clone(),
                barrier_generation: generation,
                arrived_via: Some(flow.id.clone()),
            })
            .collect();

        let span = self
            .timed_span(node, started_at, clock)
            .with_attribute("branches", branches.len())
            .with_attribute("generation", generation);
        self.recorder.record(span).await;

        tracing::debug!("Split {} into {} branch(es), generation {}", node.id, branches.len(), generation);
        for branch in branches {
            let token = Token {
                id: self.take_token_id(),
                ..branch
            };
            self.instance.tokens.push_back(token);
        }
    }

    async fn join(&mut self, token: Token, node: &Node) {
        let started_at = Utc::now();
        let clock = Instant::now();
        let definition = self.definition.clone();

        let generation = token.barrier_generation;
        let key = BarrierKey {
            node_id: node.id.clone(),
            instance_id: self.instance.id,
            generation,
        };
        let flow_id = token.arrived_via.clone().unwrap_or_default();
        let expected = definition.incoming_count(&node.id);
        let arrival = self.barriers.arrive(key, &flow_id, expected, Instant::now());

        let span = self
            .timed_span(node, started_at, clock)
            .with_attribute("generation", generation)
            .with_attribute("arrived_via", flow_id.as_str());

        match arrival {
            Arrival::Waiting { arrived, expected } => {
                let span = span
                    .with_attribute("arrived", arrived)
                    .with_attribute("expected", expected)
                    .with_attribute("released", false);
                self.recorder.record(span).await;
                tracing::debug!("Join {} holds {}/{} (generation {})", node.id, arrived, expected, generation);
            }
            Arrival::Released { expected } => {
                let span = span
                    .with_attribute("arrived", expected)
                    .with_attribute("expected", expected)
                    .with_attribute("released", true);
                self.recorder.record(span).await;

                let parent = self.generation_parents.get(&generation).copied().unwrap_or(generation);
                if let Some(flow) = definition.outgoing(&node.id).next() {
                    let released = self.new_token(flow.target.clone(), parent, Some(flow.id.clone()));
                    tracing::debug!("Join {} released token {} (generation {})", node.id, released.id, parent);
                    self.instance.tokens.push_back(released);
                }
            }
            Arrival::Overflow { reason } => {
                let error = RuntimeError::JoinTimeout {
                    node_id: node.id.clone(),
                    generation,
                    reason,
                };
                let span = span
                    .with_status(SpanStatus::Error)
                    .with_attribute("error_kind", error.kind())
                    .with_attribute("error", error.to_string());
                self.recorder.record(span).await;
                self.fail(error);
            }
        }
    }

    async fn end(&mut self, node: &Node, error_code: Option<&str>) {
        let span = self.recorder.node_span(node);
        match error_code {
            Some(code) => {
                let error = RuntimeError::ErrorEnd {
                    node_id: node.id.clone(),
                    code: code.to_string(),
                };
                let span = span
                    .with_status(SpanStatus::Error)
                    .with_attribute("error_code", code)
                    .with_attribute("error_kind", error.kind());
                self.recorder.record(span).await;
                self.fail(error);
            }
            None => {
                self.recorder.record(span).await;
                if self.is_quiescent() {
                    self.complete_instance();
                }
            }
        }
    }

    /// Nothing queued and nothing running: either a join can never complete
    /// or the last token has already been consumed
    async fn settle(&mut self) {
        let stalled = self.barriers.pending().first().map(|(key, _)| (*key).clone());
        match stalled {
            Some(key) => {
                self.join_timed_out(key, "no live tokens remain to complete the barrier")
                    .await
            }
            None => self.complete_instance(),
        }
    }

    async fn join_timed_out(&mut self, key: BarrierKey, reason: &str) {
        let (arrived, expected) = self
            .barriers
            .get(&key)
            .map(|b| (b.arrived(), b.expected()))
            .unwrap_or_default();
        let error = RuntimeError::JoinTimeout {
            node_id: key.node_id.clone(),
            generation: key.generation,
            reason: format!("{} ({}/{} arrived)", reason, arrived, expected),
        };

        let definition = self.definition.clone();
        let span = match definition.node(&key.node_id) {
            Some(node) => self.recorder.node_span(node),
            None => SpanRecord::new(self.recorder.trace_id(), key.node_id.clone(), "ParallelGateway"),
        };
        let span = span
            .with_status(SpanStatus::Error)
            .with_attribute("error_kind", error.kind())
            .with_attribute("error", error.to_string())
            .with_attribute("generation", key.generation)
            .with_attribute("arrived", arrived)
            .with_attribute("expected", expected);
        self.recorder.record(span).await;
        self.fail(error);
    }

    async fn cancel(&mut self) {
        tracing::warn!(instance_id = %self.instance.id, "Cancellation requested");

        // In-flight attempts run to completion; their results are dropped
        while let Some(done) = self.in_flight.next().await {
            tracing::debug!("Discarding result of {} after cancellation", done.node_id);
        }
        let abandoned = self.instance.tokens.len() + self.in_flight_tokens.len();
        self.in_flight_tokens.clear();

        let error = RuntimeError::Cancelled { node_id: None };
        let span = SpanRecord::new(self.recorder.trace_id(), self.definition.id(), "Instance")
            .with_status(SpanStatus::Error)
            .with_attribute("error_kind", error.kind())
            .with_attribute("abandoned_tokens", abandoned);
        self.recorder.record(span).await;
        self.fail(error);
    }

    async fn suspend(&mut self) {
        if let Err(e) = self.instance.transition(InstanceStatus::Suspended) {
            tracing::warn!("Cannot suspend instance {}: {}", self.instance.id, e);
            return;
        }
        tracing::info!(instance_id = %self.instance.id, "Instance suspended");
        self.publish().await;

        match self.control.wait_for_resume().await {
            Wake::Resumed => {
                if let Err(e) = self.instance.transition(InstanceStatus::Running) {
                    tracing::warn!("Cannot resume instance {}: {}", self.instance.id, e);
                    return;
                }
                tracing::info!(instance_id = %self.instance.id, "Instance resumed");
            }
            Wake::Cancelled => {}
        }
    }

    fn move_along(&mut self, token: Token, node: &Node) {
        match self.definition.outgoing(&node.id).next() {
            Some(flow) => {
                let token = Token {
                    current_node: flow.target.clone(),
                    arrived_via: Some(flow.id.clone()),
                    ..token
                };
                self.instance.tokens.push_back(token);
            }
            None => tracing::warn!("Node {} has no outgoing flow, token {} dropped", node.id, token.id),
        }
    }

    fn complete_instance(&mut self) {
        match self.instance.transition(InstanceStatus::Completed) {
            Ok(()) => tracing::info!(instance_id = %self.instance.id, "Instance completed"),
            Err(e) => tracing::warn!("Cannot complete instance {}: {}", self.instance.id, e),
        }
    }

    fn fail(&mut self, error: RuntimeError) {
        tracing::error!(
            instance_id = %self.instance.id,
            kind = error.kind(),
            "Instance failed: {}",
            error
        );
        if let Err(e) = self.instance.fail(error) {
            tracing::warn!("Cannot fail instance {}: {}", self.instance.id, e);
        }
        // Dropping pending attempts aborts their handlers
        self.in_flight = FuturesUnordered::new();
        self.in_flight_tokens.clear();
    }

    fn is_quiescent(&self) -> bool {
        self.instance.tokens.is_empty() && self.in_flight.is_empty() && !self.barriers.has_pending()
    }

    fn new_token(&mut self, current_node: NodeId, barrier_generation: u64, arrived_via: Option<String>) -> Token {
        Token {
            id: self.take_token_id(),
            current_node,
            barrier_generation,
            arrived_via,
        }
    }

    fn take_token_id(&mut self) -> TokenId {
        let id = self.next_token_id;
        self.next_token_id += 1;
        id
    }

    fn timed_span(&self, node: &Node, started_at: DateTime<Utc>, clock: Instant) -> SpanRecord {
        self.recorder
            .node_span(node)
            .started_at(started_at, clock.elapsed().as_millis() as u64)
    }

    async fn publish(&mut self) {
        let mut snapshot = self.instance.clone();
        snapshot.tokens.extend(self.in_flight_tokens.values().cloned());
        self.store.publish(snapshot).await;
    }

    async fn finish(mut self) -> (WorkflowInstance, Vec<SpanRecord>) {
        self.recorder.flush().await;
        self.publish().await;
        tracing::info!(
            instance_id = %self.instance.id,
            status = %self.instance.status(),
            spans = self.recorder.len(),
            "Instance finished"
        );
        (self.instance, self.recorder.into_records())
    }
}
