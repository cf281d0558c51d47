//! The execution engine: a node-by-node state machine over graph snapshots.
//!
//! One `step` advances an execution by exactly one node and persists the
//! result in a single atomic store write. That write is the crash-safety
//! boundary: a crash before it means the step is retried from the last
//! committed state, and the effect ledger keeps retried steps from
//! repeating external side effects.
//!
//! The engine runs in one of two modes:
//! - `Live`: action nodes call the action adapter, wait nodes suspend on a
//!   timer, condition nodes evaluate automatically.
//! - `Simulation`: action nodes log a synthetic "would execute" entry, wait
//!   nodes pass through, and condition nodes suspend until an operator
//!   picks the branch. Used by authors to dry-run a graph before
//!   activation; never reachable from the trigger dispatcher.

use crate::adapter::{ActionAdapter, ActionRequest};
use crate::condition;
use crate::context::ExecutionContext;
use crate::definition::Workflow;
use crate::edge::Handle;
use crate::error::EngineError;
use crate::execution::{Execution, ExecutionStatus, WaitReason};
use crate::node::{Node, NodeConfig};
use crate::store::{EffectKey, ExecutionStore};
use crate::template;
use chrono::Utc;
use dunflow_core::{ClientId, ExecutionId};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Whether the engine performs real effects or dry-runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Real execution: adapters are invoked, timers suspend.
    Live,
    /// Dry-run: effects are logged, timers skipped, branches manual.
    Simulation,
}

/// Engine tuning knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Adapter attempts per effect node before the execution fails.
    #[serde(default = "default_max_action_attempts")]
    pub max_action_attempts: u32,
    /// Base backoff between adapter retries, doubled per failure.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Timeout applied to each adapter call.
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
    /// Upper bound on steps per drive, against runaway graphs.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
}

fn default_max_action_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_action_timeout_secs() -> u64 {
    30
}

fn default_max_steps() -> u32 {
    10_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_action_attempts: default_max_action_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            action_timeout_secs: default_action_timeout_secs(),
            max_steps: default_max_steps(),
        }
    }
}

/// The workflow execution engine.
pub struct ExecutionEngine<S, A> {
    store: S,
    adapter: A,
    config: EngineConfig,
    mode: EngineMode,
}

impl<S: ExecutionStore, A: ActionAdapter> ExecutionEngine<S, A> {
    /// Creates a live engine.
    pub fn new(store: S, adapter: A, config: EngineConfig) -> Self {
        Self {
            store,
            adapter,
            config,
            mode: EngineMode::Live,
        }
    }

    /// Creates a simulation engine for dry-running graphs.
    pub fn simulator(store: S, adapter: A, config: EngineConfig) -> Self {
        Self {
            store,
            adapter,
            config,
            mode: EngineMode::Simulation,
        }
    }

    /// Returns the engine mode.
    #[must_use]
    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// Starts a new execution of a workflow for a client case.
    ///
    /// The workflow graph is validated, snapshotted into the execution, and
    /// the execution is driven until it suspends or terminates.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGraph` when the graph fails validation, or a store
    /// error.
    pub async fn start(
        &self,
        workflow: &Workflow,
        client_id: ClientId,
        initial_context: ExecutionContext,
    ) -> Result<ExecutionId, EngineError> {
        let errors = workflow.validate();
        if !errors.is_empty() {
            return Err(EngineError::InvalidGraph { errors });
        }

        let graph = workflow.snapshot();
        let entry = match graph.entry_node() {
            Ok(node) => node.id,
            Err(_) => {
                return Err(EngineError::InvalidGraph {
                    errors: vec![crate::error::ValidationError::NoEntryNode],
                });
            }
        };

        let mut execution = Execution::new(
            workflow.id,
            workflow.tenant_id,
            client_id,
            graph,
            entry,
            initial_context,
        );
        tracing::info!(
            execution_id = %execution.id,
            workflow_id = %workflow.id,
            client_id = %client_id,
            "starting execution"
        );
        self.store.insert(&execution).await?;
        self.drive(&mut execution).await?;
        Ok(execution.id)
    }

    /// Returns the current state of an execution.
    ///
    /// # Errors
    ///
    /// Returns a store error if the execution does not exist.
    pub async fn status(&self, id: ExecutionId) -> Result<Execution, EngineError> {
        let mut execution = self.store.load(id).await?;
        execution.after_load();
        Ok(execution)
    }

    /// Resumes an execution whose timer came due, or re-drives one left in
    /// `running` by a crashed worker.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatus` if the execution is not resumable this way.
    pub async fn resume_due(&self, mut execution: Execution) -> Result<Execution, EngineError> {
        execution.after_load();
        match execution.status {
            ExecutionStatus::Suspended(WaitReason::Timer) => {
                tracing::debug!(execution_id = %execution.id, "timer due, resuming");
                let next = execution
                    .graph
                    .successor_via(execution.current_node_id, None)
                    .map(|n| n.id);
                match next {
                    Some(next) => {
                        execution.advance_to(next);
                        execution.resume();
                        self.store.update(&execution).await?;
                        self.drive(&mut execution).await?;
                    }
                    None => {
                        execution.complete();
                        self.store.update(&execution).await?;
                    }
                }
                Ok(execution)
            }
            ExecutionStatus::Running => {
                tracing::warn!(
                    execution_id = %execution.id,
                    "re-driving execution reclaimed from a stalled worker"
                );
                self.drive(&mut execution).await?;
                Ok(execution)
            }
            status => Err(EngineError::InvalidStatus {
                execution_id: execution.id,
                status,
                expected: "waiting_timer or running",
            }),
        }
    }

    /// Resumes an execution waiting for an inbound reply.
    ///
    /// The reply is stored under the wait node's capture key, the execution
    /// advances past the wait node, and is driven onwards.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatus` if the execution is not waiting for a reply.
    pub async fn resume_with_response(
        &self,
        id: ExecutionId,
        input: JsonValue,
    ) -> Result<Execution, EngineError> {
        let mut execution = self.status(id).await?;
        if execution.status != ExecutionStatus::Suspended(WaitReason::Response) {
            return Err(EngineError::InvalidStatus {
                execution_id: id,
                status: execution.status,
                expected: "waiting_response",
            });
        }

        let capture_key = match execution.current_node().map(|n| &n.config) {
            Some(NodeConfig::WaitResponse(config)) => config.capture_key().to_string(),
            _ => "response".to_string(),
        };
        tracing::info!(
            execution_id = %id,
            capture_key = %capture_key,
            "inbound response received, resuming"
        );
        execution.context.set(capture_key, input);

        let next = execution
            .graph
            .successor_via(execution.current_node_id, None)
            .map(|n| n.id);
        match next {
            Some(next) => {
                execution.advance_to(next);
                execution.resume();
                self.store.update(&execution).await?;
                self.drive(&mut execution).await?;
            }
            None => {
                execution.complete();
                self.store.update(&execution).await?;
            }
        }
        Ok(execution)
    }

    /// Supplies a branch choice to a simulation suspended on a condition.
    ///
    /// # Errors
    ///
    /// Returns `SimulationOnly` on a live engine, or `InvalidStatus` if the
    /// execution is not waiting for a choice.
    pub async fn resume_with_choice(
        &self,
        id: ExecutionId,
        handle: Handle,
    ) -> Result<Execution, EngineError> {
        if self.mode != EngineMode::Simulation {
            return Err(EngineError::SimulationOnly);
        }

        let mut execution = self.status(id).await?;
        if execution.status != ExecutionStatus::Suspended(WaitReason::Choice) {
            return Err(EngineError::InvalidStatus {
                execution_id: id,
                status: execution.status,
                expected: "waiting_choice",
            });
        }

        let node_id = execution.current_node_id;
        let next = execution
            .graph
            .successor_via(node_id, Some(handle))
            .map(|n| n.id);
        match next {
            Some(next) => {
                execution.advance_to(next);
                execution.resume();
                self.store.update(&execution).await?;
                self.drive(&mut execution).await?;
            }
            None => {
                execution.fail(
                    format!("no outgoing edge for handle '{handle}'"),
                    node_id,
                );
                self.store.update(&execution).await?;
            }
        }
        Ok(execution)
    }

    /// Cancels an execution, clearing any pending timer registration.
    ///
    /// Cancelling an already terminal execution is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a store error if the execution does not exist.
    pub async fn cancel(&self, id: ExecutionId) -> Result<Execution, EngineError> {
        let mut execution = self.status(id).await?;
        if execution.is_terminal() {
            return Ok(execution);
        }
        tracing::info!(execution_id = %id, "cancelling execution");
        execution.cancel();
        self.store.update(&execution).await?;
        Ok(execution)
    }

    /// Cancels every non-terminal execution of a workflow.
    ///
    /// Called when a workflow is deactivated so no orphan timer ever fires
    /// for it. Returns how many executions were cancelled.
    ///
    /// # Errors
    ///
    /// Returns a store error if lookup or persistence fails.
    pub async fn cancel_for_workflow(
        &self,
        workflow_id: dunflow_core::WorkflowId,
    ) -> Result<usize, EngineError> {
        let active = self.store.active_for_workflow(workflow_id).await?;
        let count = active.len();
        for id in active {
            self.cancel(id).await?;
        }
        if count > 0 {
            tracing::info!(
                workflow_id = %workflow_id,
                cancelled = count,
                "cancelled executions of deactivated workflow"
            );
        }
        Ok(count)
    }

    /// Drives an execution until it suspends or terminates.
    async fn drive(&self, execution: &mut Execution) -> Result<(), EngineError> {
        let mut steps = 0u32;
        while execution.status == ExecutionStatus::Running {
            steps += 1;
            if steps > self.config.max_steps {
                tracing::error!(
                    execution_id = %execution.id,
                    steps,
                    "step limit exceeded"
                );
                execution.fail("step limit exceeded", execution.current_node_id);
                self.store.update(execution).await?;
                break;
            }
            self.step(execution).await?;
        }
        Ok(())
    }

    /// Advances the execution by exactly one node and persists the result.
    async fn step(&self, execution: &mut Execution) -> Result<(), EngineError> {
        let Some(node) = execution.current_node().cloned() else {
            let node_id = execution.current_node_id;
            execution.fail("current node missing from graph snapshot", node_id);
            self.store.update(execution).await?;
            return Ok(());
        };

        tracing::debug!(
            execution_id = %execution.id,
            node_id = %node.id,
            kind = ?node.kind(),
            "stepping"
        );

        match &node.config {
            NodeConfig::Trigger(_) => self.advance_via(execution, &node, None).await,
            NodeConfig::EndFlow => {
                execution.complete();
                Ok(self.store.update(execution).await?)
            }
            NodeConfig::Condition(spec) => {
                if self.mode == EngineMode::Simulation {
                    execution.suspend(WaitReason::Choice, None);
                    Ok(self.store.update(execution).await?)
                } else {
                    let handle = condition::evaluate(spec, &execution.context);
                    tracing::debug!(
                        execution_id = %execution.id,
                        node_id = %node.id,
                        handle = %handle,
                        "condition resolved"
                    );
                    self.advance_via(execution, &node, Some(handle)).await
                }
            }
            NodeConfig::Wait(config) => {
                if self.mode == EngineMode::Simulation {
                    execution
                        .context
                        .record_simulation(format!("skipped: {}", node.config.describe()));
                    self.advance_via(execution, &node, None).await
                } else {
                    let wake_at = Utc::now() + config.duration();
                    tracing::debug!(
                        execution_id = %execution.id,
                        node_id = %node.id,
                        wake_at = %wake_at,
                        "suspending on timer"
                    );
                    execution.suspend(WaitReason::Timer, Some(wake_at));
                    Ok(self.store.update(execution).await?)
                }
            }
            NodeConfig::WaitResponse(_) => {
                execution.suspend(WaitReason::Response, None);
                Ok(self.store.update(execution).await?)
            }
            NodeConfig::Loop(config) => {
                let count = execution.context.loop_count(node.id);
                let exit_now = config
                    .exit_condition
                    .as_ref()
                    .is_some_and(|c| condition::holds(c, &execution.context));
                if exit_now || count >= config.max_iterations {
                    tracing::debug!(
                        execution_id = %execution.id,
                        node_id = %node.id,
                        iterations = count,
                        "loop exiting"
                    );
                    self.advance_via(execution, &node, Some(Handle::No)).await
                } else {
                    execution.context.record_iteration(node.id);
                    self.advance_via(execution, &node, Some(Handle::Yes)).await
                }
            }
            _ => self.step_effect(execution, &node).await,
        }
    }

    /// Executes an effect node through the action adapter, idempotently.
    async fn step_effect(&self, execution: &mut Execution, node: &Node) -> Result<(), EngineError> {
        if self.mode == EngineMode::Simulation {
            let rendered = self.render_config(execution, node);
            execution
                .context
                .record_simulation(format!("would execute: {}", rendered.describe()));
            return self.advance_via(execution, node, None).await;
        }

        let key = EffectKey::new(execution.id, node.id, execution.invocation(node.id));

        if let Some(recorded) = self.store.completed_effect(&key).await? {
            tracing::debug!(
                execution_id = %execution.id,
                node_id = %node.id,
                effect_key = %key,
                "effect already recorded, skipping adapter"
            );
            self.apply_effect_output(execution, node, recorded);
            return self.advance_via(execution, node, None).await;
        }

        let request = ActionRequest {
            execution_id: execution.id,
            tenant_id: execution.tenant_id,
            client_id: execution.client_id,
            node_id: node.id,
            node_name: node.name.clone(),
            config: self.render_config(execution, node),
            context: execution.context.to_value(),
        };

        let timeout = Duration::from_secs(self.config.action_timeout_secs);
        let outcome = tokio::time::timeout(timeout, self.adapter.execute(&request)).await;

        match outcome {
            Ok(Ok(output)) => {
                self.store.record_effect(&key, &output.context).await?;
                self.apply_effect_output(execution, node, output.context);
                self.advance_via(execution, node, None).await
            }
            Ok(Err(err)) => self.handle_effect_failure(execution, node, err.to_string()).await,
            Err(_elapsed) => {
                self.handle_effect_failure(execution, node, "action timed out".to_string())
                    .await
            }
        }
    }

    /// Records a failed adapter call: retry with backoff, or fail terminally.
    async fn handle_effect_failure(
        &self,
        execution: &mut Execution,
        node: &Node,
        reason: String,
    ) -> Result<(), EngineError> {
        let failures = execution.bump_attempt(node.id);
        if failures >= self.config.max_action_attempts {
            tracing::error!(
                execution_id = %execution.id,
                node_id = %node.id,
                failures,
                reason = %reason,
                "action exhausted retries"
            );
            execution.fail(
                format!("action failed after {failures} attempts: {reason}"),
                node.id,
            );
            Ok(self.store.update(execution).await?)
        } else {
            tracing::warn!(
                execution_id = %execution.id,
                node_id = %node.id,
                failures,
                reason = %reason,
                "action failed, retrying"
            );
            self.store.update(execution).await?;
            let shift = failures.saturating_sub(1).min(10);
            let backoff = self.config.backoff_base_ms.saturating_mul(1 << shift);
            tokio::time::sleep(Duration::from_millis(backoff)).await;
            Ok(())
        }
    }

    /// Merges an effect's output into the context, bumps the invocation
    /// sequence and clears the failure streak.
    fn apply_effect_output(&self, execution: &mut Execution, node: &Node, output: JsonValue) {
        execution.context.merge(output);
        if let NodeConfig::UpdateStatus(config) = &node.config {
            execution
                .context
                .set("new_status", JsonValue::String(config.new_status.clone()));
        }
        execution.bump_invocation(node.id);
        execution.reset_attempts(node.id);
    }

    /// Moves the execution along the edge selected by `handle`.
    ///
    /// A node with no outgoing edges completes the execution; a node whose
    /// edges exist but none matches the handle is a dead end and fails it.
    async fn advance_via(
        &self,
        execution: &mut Execution,
        node: &Node,
        handle: Option<Handle>,
    ) -> Result<(), EngineError> {
        match execution.graph.successor_via(node.id, handle).map(|n| n.id) {
            Some(next) => {
                execution.advance_to(next);
            }
            None => {
                if handle.is_none() && execution.graph.successors(node.id).is_empty() {
                    execution.complete();
                } else {
                    let label = handle.map_or_else(|| "default".to_string(), |h| h.to_string());
                    tracing::error!(
                        execution_id = %execution.id,
                        node_id = %node.id,
                        handle = %label,
                        "no outgoing edge"
                    );
                    execution.fail(format!("no outgoing edge for handle '{label}'"), node.id);
                }
            }
        }
        Ok(self.store.update(execution).await?)
    }

    /// Clones the node config with every template field rendered against the
    /// current context, logging unresolved variables.
    fn render_config(&self, execution: &Execution, node: &Node) -> NodeConfig {
        let mut config = node.config.clone();
        match &mut config {
            NodeConfig::Message(message) => {
                message.template = self.render_field(execution, node, &message.template);
            }
            NodeConfig::TransferToHuman(transfer) => {
                if let Some(note) = &transfer.note {
                    transfer.note = Some(self.render_field(execution, node, note));
                }
            }
            NodeConfig::CallWebhook(webhook) => {
                webhook.url = self.render_field(execution, node, &webhook.url);
            }
            NodeConfig::AiNegotiate(ai) => {
                ai.instructions = self.render_field(execution, node, &ai.instructions);
            }
            _ => {}
        }
        config
    }

    fn render_field(&self, execution: &Execution, node: &Node, text: &str) -> String {
        let rendered = template::resolve(text, &execution.context);
        for variable in &rendered.unresolved {
            tracing::warn!(
                execution_id = %execution.id,
                node_id = %node.id,
                variable = %variable,
                "unresolved template variable left literal"
            );
        }
        rendered.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{FlakyAdapter, RecordingAdapter};
    use crate::condition::{ComparisonOp, ConditionSpec};
    use crate::edge::Edge;
    use crate::graph::WorkflowGraph;
    use crate::node::{
        LoopNodeConfig, MessageChannel, MessageNodeConfig, Node, NodeId, TriggerKind,
        TriggerNodeConfig, UpdateStatusNodeConfig, WaitNodeConfig, WaitResponseNodeConfig,
    };
    use crate::store::InMemoryExecutionStore;
    use dunflow_core::TenantId;
    use serde_json::json;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            backoff_base_ms: 1,
            ..EngineConfig::default()
        }
    }

    fn message(name: &str, template: &str) -> Node {
        Node::new(
            name,
            NodeConfig::Message(MessageNodeConfig {
                channel: MessageChannel::Whatsapp,
                template: template.to_string(),
            }),
        )
    }

    /// trigger_overdue(1d) -> whatsapp -> wait(3d) -> whatsapp -> update_status
    fn overdue_workflow() -> (Workflow, NodeId) {
        let mut workflow = Workflow::new(
            TenantId::new(),
            "Régua fatura vencida",
            TriggerKind::InvoiceOverdue,
        );
        let trigger = Node::new(
            "Fatura vencida",
            NodeConfig::Trigger(TriggerNodeConfig::InvoiceOverdue { days: 1 }),
        );
        let first = message(
            "Primeira cobrança",
            "Olá {{nome}}, sua fatura de R$ {{valor}} está vencida.",
        );
        let wait = Node::new("Espera", NodeConfig::Wait(WaitNodeConfig::days(3)));
        let second = message("Lembrete", "{{nome}}, podemos negociar sua fatura?");
        let status = Node::new(
            "Marca negociação",
            NodeConfig::UpdateStatus(UpdateStatusNodeConfig {
                new_status: "em_negociacao".to_string(),
            }),
        );
        let ids: Vec<NodeId> = [&trigger, &first, &wait, &second, &status]
            .iter()
            .map(|n| n.id)
            .collect();
        let first_id = first.id;
        for node in [trigger, first, wait, second, status] {
            workflow.graph.add_node(node);
        }
        for pair in ids.windows(2) {
            workflow.graph.add_edge(pair[0], pair[1], Edge::new()).unwrap();
        }
        workflow.activate().expect("valid workflow");
        (workflow, first_id)
    }

    fn initial_context() -> ExecutionContext {
        let mut context = ExecutionContext::new();
        context.set("nome", json!("João"));
        context.set("valor", json!(150.00));
        context
    }

    #[tokio::test]
    async fn scenario_overdue_flow_runs_to_done() {
        let store = InMemoryExecutionStore::new();
        let adapter = RecordingAdapter::with_output(json!({"message_id": "m1"}));
        let engine = ExecutionEngine::new(store.clone(), adapter.clone(), fast_config());
        let (workflow, _) = overdue_workflow();

        let started = Utc::now();
        let id = engine
            .start(&workflow, ClientId::new(), initial_context())
            .await
            .unwrap();

        // First message sent, then suspended on the 3 day timer.
        let execution = engine.status(id).await.unwrap();
        assert_eq!(
            execution.status,
            ExecutionStatus::Suspended(WaitReason::Timer)
        );
        let wake_at = execution.wake_at.expect("wake_at set");
        let wait = wake_at - started;
        assert!(wait >= chrono::Duration::days(3) - chrono::Duration::minutes(1));
        assert!(wait <= chrono::Duration::days(3) + chrono::Duration::minutes(1));
        assert_eq!(adapter.call_count(), 1);

        // The template was rendered before reaching the adapter.
        let first_request = &adapter.requests()[0];
        match &first_request.config {
            NodeConfig::Message(m) => {
                assert_eq!(m.template, "Olá João, sua fatura de R$ 150.0 está vencida.");
            }
            other => panic!("unexpected config: {other:?}"),
        }

        // Scheduler fires: drives through the second message and the status
        // update to completion.
        let resumed = engine.resume_due(execution).await.unwrap();
        assert_eq!(resumed.status, ExecutionStatus::Done);
        assert_eq!(adapter.call_count(), 3);
        assert_eq!(resumed.context.get_str("new_status"), Some("em_negociacao"));
        assert_eq!(store.effect_count(), 3);
    }

    #[tokio::test]
    async fn condition_routes_by_score() {
        let mut workflow = Workflow::new(TenantId::new(), "Roteia por score", TriggerKind::Manual);
        let trigger = Node::new("Início", NodeConfig::Trigger(TriggerNodeConfig::Manual));
        let cond = Node::new(
            "Score alto?",
            NodeConfig::Condition(ConditionSpec::new(
                "score",
                ComparisonOp::GreaterThan,
                json!(70),
            )),
        );
        let yes = message("Proposta", "proposta especial");
        let no = message("Cobrança", "cobrança padrão");
        let trigger_id = trigger.id;
        let cond_id = cond.id;
        let yes_id = yes.id;
        let no_id = no.id;
        for node in [trigger, cond, yes, no] {
            workflow.graph.add_node(node);
        }
        workflow.graph.add_edge(trigger_id, cond_id, Edge::new()).unwrap();
        workflow
            .graph
            .add_edge(cond_id, yes_id, Edge::with_handle(Handle::Yes))
            .unwrap();
        workflow
            .graph
            .add_edge(cond_id, no_id, Edge::with_handle(Handle::No))
            .unwrap();
        workflow.activate().expect("valid workflow");

        for (score, expected_node) in [
            (Some(json!(85)), yes_id),
            (Some(json!(50)), no_id),
            (None, no_id),
        ] {
            let store = InMemoryExecutionStore::new();
            let adapter = RecordingAdapter::new();
            let engine = ExecutionEngine::new(store, adapter.clone(), fast_config());

            let mut context = ExecutionContext::new();
            if let Some(score) = score {
                context.set("score", score);
            }
            let id = engine
                .start(&workflow, ClientId::new(), context)
                .await
                .unwrap();

            let execution = engine.status(id).await.unwrap();
            assert_eq!(execution.status, ExecutionStatus::Done);
            assert_eq!(adapter.call_count(), 1);
            assert_eq!(adapter.requests()[0].node_id, expected_node);
        }
    }

    #[tokio::test]
    async fn loop_runs_exactly_max_iterations_then_exits() {
        let mut workflow = Workflow::new(TenantId::new(), "Tentativas", TriggerKind::Manual);
        let trigger = Node::new("Início", NodeConfig::Trigger(TriggerNodeConfig::Manual));
        let lp = Node::new(
            "Loop",
            NodeConfig::Loop(LoopNodeConfig {
                max_iterations: 5,
                exit_condition: None,
            }),
        );
        let body = message("Corpo", "tentativa de contato");
        let end = Node::new("Fim", NodeConfig::EndFlow);
        let trigger_id = trigger.id;
        let loop_id = lp.id;
        let body_id = body.id;
        let end_id = end.id;
        for node in [trigger, lp, body, end] {
            workflow.graph.add_node(node);
        }
        workflow.graph.add_edge(trigger_id, loop_id, Edge::new()).unwrap();
        workflow
            .graph
            .add_edge(loop_id, body_id, Edge::with_handle(Handle::Yes))
            .unwrap();
        workflow.graph.add_edge(body_id, loop_id, Edge::new()).unwrap();
        workflow
            .graph
            .add_edge(loop_id, end_id, Edge::with_handle(Handle::No))
            .unwrap();
        workflow.activate().expect("valid workflow");

        let store = InMemoryExecutionStore::new();
        let adapter = RecordingAdapter::new();
        let engine = ExecutionEngine::new(store, adapter.clone(), fast_config());

        let id = engine
            .start(&workflow, ClientId::new(), ExecutionContext::new())
            .await
            .unwrap();

        let execution = engine.status(id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Done);
        assert_eq!(adapter.call_count(), 5);
        assert_eq!(execution.context.loop_count(loop_id), 5);
    }

    #[tokio::test]
    async fn loop_exit_condition_short_circuits() {
        let mut workflow = Workflow::new(TenantId::new(), "Loop condicional", TriggerKind::Manual);
        let trigger = Node::new("Início", NodeConfig::Trigger(TriggerNodeConfig::Manual));
        let lp = Node::new(
            "Loop",
            NodeConfig::Loop(LoopNodeConfig {
                max_iterations: 10,
                exit_condition: Some(ConditionSpec::new(
                    "pago",
                    ComparisonOp::Equal,
                    json!(1),
                )),
            }),
        );
        let body = message("Corpo", "cobrando");
        let end = Node::new("Fim", NodeConfig::EndFlow);
        let trigger_id = trigger.id;
        let loop_id = lp.id;
        let body_id = body.id;
        let end_id = end.id;
        for node in [trigger, lp, body, end] {
            workflow.graph.add_node(node);
        }
        workflow.graph.add_edge(trigger_id, loop_id, Edge::new()).unwrap();
        workflow
            .graph
            .add_edge(loop_id, body_id, Edge::with_handle(Handle::Yes))
            .unwrap();
        workflow.graph.add_edge(body_id, loop_id, Edge::new()).unwrap();
        workflow
            .graph
            .add_edge(loop_id, end_id, Edge::with_handle(Handle::No))
            .unwrap();
        workflow.activate().expect("valid workflow");

        let store = InMemoryExecutionStore::new();
        let adapter = RecordingAdapter::new();
        let engine = ExecutionEngine::new(store, adapter.clone(), fast_config());

        let mut context = ExecutionContext::new();
        context.set("pago", json!(1));
        let id = engine.start(&workflow, ClientId::new(), context).await.unwrap();

        let execution = engine.status(id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Done);
        // Exit condition held before the first pass: the body never ran.
        assert_eq!(adapter.call_count(), 0);
    }

    #[tokio::test]
    async fn replayed_step_does_not_reinvoke_adapter() {
        let store = InMemoryExecutionStore::new();
        let adapter = RecordingAdapter::with_output(json!({"message_id": "m1"}));
        let engine = ExecutionEngine::new(store.clone(), adapter.clone(), fast_config());

        let mut workflow = Workflow::new(TenantId::new(), "Uma mensagem", TriggerKind::Manual);
        let trigger = Node::new("Início", NodeConfig::Trigger(TriggerNodeConfig::Manual));
        let msg = message("Única", "olá");
        let trigger_id = trigger.id;
        let msg_id = msg.id;
        workflow.graph.add_node(trigger);
        workflow.graph.add_node(msg);
        workflow.graph.add_edge(trigger_id, msg_id, Edge::new()).unwrap();
        workflow.activate().expect("valid workflow");

        let id = engine
            .start(&workflow, ClientId::new(), ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(adapter.call_count(), 1);

        // Rewind to the state just before the post-effect persist, as if the
        // worker crashed between recording the effect and advancing.
        let mut crashed = engine.status(id).await.unwrap();
        crashed.status = ExecutionStatus::Running;
        crashed.current_node_id = msg_id;
        crashed.invocations.clear();
        crashed.attempts.clear();
        store.update(&crashed).await.unwrap();

        let replayed = engine.resume_due(crashed).await.unwrap();
        assert_eq!(replayed.status, ExecutionStatus::Done);
        // The recorded effect was reused; the adapter saw exactly one call.
        assert_eq!(adapter.call_count(), 1);
        assert_eq!(replayed.context.get_str("message_id"), Some("m1"));
    }

    #[tokio::test]
    async fn flaky_adapter_retries_then_succeeds() {
        let store = InMemoryExecutionStore::new();
        let adapter = FlakyAdapter::failing_times(1);
        let engine = ExecutionEngine::new(store, adapter.clone(), fast_config());

        let mut workflow = Workflow::new(TenantId::new(), "Retry", TriggerKind::Manual);
        let trigger = Node::new("Início", NodeConfig::Trigger(TriggerNodeConfig::Manual));
        let msg = message("Instável", "olá");
        let trigger_id = trigger.id;
        let msg_id = msg.id;
        workflow.graph.add_node(trigger);
        workflow.graph.add_node(msg);
        workflow.graph.add_edge(trigger_id, msg_id, Edge::new()).unwrap();
        workflow.activate().expect("valid workflow");

        let id = engine
            .start(&workflow, ClientId::new(), ExecutionContext::new())
            .await
            .unwrap();

        let execution = engine.status(id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Done);
        assert_eq!(adapter.call_count(), 2);
        // The streak was cleared after success.
        assert_eq!(execution.attempt(msg_id), 0);
    }

    #[tokio::test]
    async fn exhausted_retries_mark_execution_error() {
        let store = InMemoryExecutionStore::new();
        let adapter = FlakyAdapter::failing_times(10);
        let config = EngineConfig {
            max_action_attempts: 2,
            backoff_base_ms: 1,
            ..EngineConfig::default()
        };
        let engine = ExecutionEngine::new(store, adapter.clone(), config);

        let mut workflow = Workflow::new(TenantId::new(), "Falha", TriggerKind::Manual);
        let trigger = Node::new("Início", NodeConfig::Trigger(TriggerNodeConfig::Manual));
        let msg = message("Quebrada", "olá");
        let trigger_id = trigger.id;
        let msg_id = msg.id;
        workflow.graph.add_node(trigger);
        workflow.graph.add_node(msg);
        workflow.graph.add_edge(trigger_id, msg_id, Edge::new()).unwrap();
        workflow.activate().expect("valid workflow");

        let id = engine
            .start(&workflow, ClientId::new(), ExecutionContext::new())
            .await
            .unwrap();

        let execution = engine.status(id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Error);
        assert_eq!(adapter.call_count(), 2);
        let reason = execution
            .context
            .get_str(crate::context::ERROR_KEY)
            .expect("error recorded");
        assert!(reason.contains("2 attempts"));
        assert_eq!(
            execution.context.get_str(crate::context::ERROR_NODE_KEY),
            Some(msg_id.to_string()).as_deref()
        );
    }

    #[tokio::test]
    async fn dead_end_branch_is_fatal() {
        // Assembled directly (bypassing validation) to model a snapshot
        // whose condition lost its "no" edge.
        let mut graph = WorkflowGraph::new();
        let cond = Node::new(
            "Score alto?",
            NodeConfig::Condition(ConditionSpec::new(
                "score",
                ComparisonOp::GreaterThan,
                json!(70),
            )),
        );
        let yes = message("Sim", "ok");
        let cond_id = cond.id;
        let yes_id = yes.id;
        graph.add_node(cond);
        graph.add_node(yes);
        graph
            .add_edge(cond_id, yes_id, Edge::with_handle(Handle::Yes))
            .unwrap();

        let execution = Execution::new(
            dunflow_core::WorkflowId::new(),
            TenantId::new(),
            ClientId::new(),
            graph,
            cond_id,
            ExecutionContext::new(),
        );

        let store = InMemoryExecutionStore::new();
        let adapter = RecordingAdapter::new();
        let engine = ExecutionEngine::new(store.clone(), adapter, fast_config());
        store.insert(&execution).await.unwrap();

        // Missing score resolves to "no", which has no edge.
        let driven = engine.resume_due(execution).await.unwrap();
        assert_eq!(driven.status, ExecutionStatus::Error);
        assert!(driven
            .context
            .get_str(crate::context::ERROR_KEY)
            .unwrap()
            .contains("no outgoing edge"));
    }

    #[tokio::test]
    async fn wait_response_captures_reply() {
        let mut workflow = Workflow::new(TenantId::new(), "Aguarda resposta", TriggerKind::Manual);
        let trigger = Node::new("Início", NodeConfig::Trigger(TriggerNodeConfig::Manual));
        let wait = Node::new(
            "Aguarda proposta",
            NodeConfig::WaitResponse(WaitResponseNodeConfig {
                capture_as: Some("proposta".to_string()),
            }),
        );
        let confirm = message("Confirma", "Recebemos: {{proposta}}");
        let trigger_id = trigger.id;
        let wait_id = wait.id;
        let confirm_id = confirm.id;
        for node in [trigger, wait, confirm] {
            workflow.graph.add_node(node);
        }
        workflow.graph.add_edge(trigger_id, wait_id, Edge::new()).unwrap();
        workflow.graph.add_edge(wait_id, confirm_id, Edge::new()).unwrap();
        workflow.activate().expect("valid workflow");

        let store = InMemoryExecutionStore::new();
        let adapter = RecordingAdapter::new();
        let engine = ExecutionEngine::new(store, adapter.clone(), fast_config());

        let id = engine
            .start(&workflow, ClientId::new(), ExecutionContext::new())
            .await
            .unwrap();
        let execution = engine.status(id).await.unwrap();
        assert_eq!(
            execution.status,
            ExecutionStatus::Suspended(WaitReason::Response)
        );

        let resumed = engine
            .resume_with_response(id, json!("parcelar em 3x"))
            .await
            .unwrap();
        assert_eq!(resumed.status, ExecutionStatus::Done);
        assert_eq!(resumed.context.get_str("proposta"), Some("parcelar em 3x"));

        match &adapter.requests()[0].config {
            NodeConfig::Message(m) => {
                assert_eq!(m.template, "Recebemos: parcelar em 3x");
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_clears_pending_timer() {
        let store = InMemoryExecutionStore::new();
        let adapter = RecordingAdapter::new();
        let engine = ExecutionEngine::new(store, adapter, fast_config());
        let (workflow, _) = overdue_workflow();

        let id = engine
            .start(&workflow, ClientId::new(), initial_context())
            .await
            .unwrap();

        let cancelled = engine.cancel(id).await.unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
        assert!(cancelled.wake_at.is_none());

        // Cancelled executions cannot be resumed by the scheduler.
        let result = engine.resume_due(cancelled).await;
        assert!(matches!(result, Err(EngineError::InvalidStatus { .. })));
    }

    #[tokio::test]
    async fn deactivation_cancels_outstanding_timers() {
        let store = InMemoryExecutionStore::new();
        let adapter = RecordingAdapter::new();
        let engine = ExecutionEngine::new(store.clone(), adapter, fast_config());
        let (mut workflow, _) = overdue_workflow();

        let first = engine
            .start(&workflow, ClientId::new(), initial_context())
            .await
            .unwrap();
        let second = engine
            .start(&workflow, ClientId::new(), initial_context())
            .await
            .unwrap();

        workflow.deactivate();
        let cancelled = engine.cancel_for_workflow(workflow.id).await.unwrap();
        assert_eq!(cancelled, 2);

        for id in [first, second] {
            let execution = store.load(id).await.unwrap();
            assert_eq!(execution.status, ExecutionStatus::Cancelled);
            assert!(execution.wake_at.is_none());
        }
    }

    #[tokio::test]
    async fn start_rejects_invalid_graph() {
        let store = InMemoryExecutionStore::new();
        let adapter = RecordingAdapter::new();
        let engine = ExecutionEngine::new(store, adapter, fast_config());

        let workflow = Workflow::new(TenantId::new(), "Vazio", TriggerKind::Manual);
        let result = engine
            .start(&workflow, ClientId::new(), ExecutionContext::new())
            .await;
        assert!(matches!(result, Err(EngineError::InvalidGraph { .. })));
    }

    #[tokio::test]
    async fn simulation_logs_effects_and_skips_waits() {
        let store = InMemoryExecutionStore::new();
        let adapter = RecordingAdapter::new();
        let engine = ExecutionEngine::simulator(store.clone(), adapter.clone(), fast_config());
        let (workflow, _) = overdue_workflow();

        let id = engine
            .start(&workflow, ClientId::new(), initial_context())
            .await
            .unwrap();

        let execution = engine.status(id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Done);
        // No adapter calls, no recorded effects; everything is in the log.
        assert_eq!(adapter.call_count(), 0);
        assert_eq!(store.effect_count(), 0);

        let log = execution.context.simulation_log();
        assert_eq!(log.len(), 4); // two messages, one wait, one status update
        assert!(log[0].contains("would execute"));
        assert!(log[0].contains("Olá João"));
        assert!(log.iter().any(|entry| entry.contains("skipped: wait 3d")));
    }

    #[tokio::test]
    async fn simulation_suspends_conditions_for_manual_choice() {
        let mut workflow = Workflow::new(TenantId::new(), "Dry-run", TriggerKind::Manual);
        let trigger = Node::new("Início", NodeConfig::Trigger(TriggerNodeConfig::Manual));
        let cond = Node::new(
            "Score alto?",
            NodeConfig::Condition(ConditionSpec::new(
                "score",
                ComparisonOp::GreaterThan,
                json!(70),
            )),
        );
        let yes = message("Proposta", "proposta");
        let no = message("Cobrança", "cobrança");
        let trigger_id = trigger.id;
        let cond_id = cond.id;
        let yes_id = yes.id;
        let no_id = no.id;
        for node in [trigger, cond, yes, no] {
            workflow.graph.add_node(node);
        }
        workflow.graph.add_edge(trigger_id, cond_id, Edge::new()).unwrap();
        workflow
            .graph
            .add_edge(cond_id, yes_id, Edge::with_handle(Handle::Yes))
            .unwrap();
        workflow
            .graph
            .add_edge(cond_id, no_id, Edge::with_handle(Handle::No))
            .unwrap();
        workflow.activate().expect("valid workflow");

        let store = InMemoryExecutionStore::new();
        let adapter = RecordingAdapter::new();
        let engine = ExecutionEngine::simulator(store.clone(), adapter.clone(), fast_config());

        // Even with a score present, the simulator defers to the operator.
        let mut context = ExecutionContext::new();
        context.set("score", json!(85));
        let id = engine.start(&workflow, ClientId::new(), context).await.unwrap();

        let execution = engine.status(id).await.unwrap();
        assert_eq!(
            execution.status,
            ExecutionStatus::Suspended(WaitReason::Choice)
        );

        let resumed = engine.resume_with_choice(id, Handle::No).await.unwrap();
        assert_eq!(resumed.status, ExecutionStatus::Done);
        let log = resumed.context.simulation_log();
        assert!(log.iter().any(|entry| entry.contains("cobrança")));

        // A live engine refuses manual choices.
        let live = ExecutionEngine::new(store, adapter, fast_config());
        let result = live.resume_with_choice(id, Handle::Yes).await;
        assert!(matches!(result, Err(EngineError::SimulationOnly)));
    }

    #[tokio::test]
    async fn unresolved_template_left_literal_in_request() {
        let store = InMemoryExecutionStore::new();
        let adapter = RecordingAdapter::new();
        let engine = ExecutionEngine::new(store, adapter.clone(), fast_config());

        let mut workflow = Workflow::new(TenantId::new(), "Sem variável", TriggerKind::Manual);
        let trigger = Node::new("Início", NodeConfig::Trigger(TriggerNodeConfig::Manual));
        let msg = message("Falta dado", "Parcela {{parcela}} em aberto");
        let trigger_id = trigger.id;
        let msg_id = msg.id;
        workflow.graph.add_node(trigger);
        workflow.graph.add_node(msg);
        workflow.graph.add_edge(trigger_id, msg_id, Edge::new()).unwrap();
        workflow.activate().expect("valid workflow");

        let id = engine
            .start(&workflow, ClientId::new(), ExecutionContext::new())
            .await
            .unwrap();

        let execution = engine.status(id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Done);
        match &adapter.requests()[0].config {
            NodeConfig::Message(m) => {
                assert_eq!(m.template, "Parcela {{parcela}} em aberto");
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }
}
