use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::SmithConfig;
use crate::engine::{InvokeContext, ToolInvoker};
use crate::schemas::{emit, Dag, DagNode, EngineEvent, EventSender, ExecutionRecord, NodeStatus, OnFail, Trace};
use crate::utils::helper::{reference_regex, unix_ts, whole_reference};

/// Terminal disposition of one DAG execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Every node reached a terminal state without a halting failure.
    Completed,
    /// A node with `on_fail = halt` failed; the rest of the plan was skipped.
    Halted,
    /// Nothing was runnable but pending nodes remained.
    Blocked,
}

impl RunOutcome {
    /// Process exit-code mapping for embedders exposing runs as commands.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::Halted => 3,
            RunOutcome::Blocked => 4,
        }
    }
}

/// Everything an execution produces: outcome, full trace in commit order,
/// terminal status per node that left PENDING, and the final node's output
/// when it succeeded.
pub struct RunResult {
    pub outcome: RunOutcome,
    pub trace: Trace,
    pub statuses: HashMap<usize, NodeStatus>,
    pub final_output: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Ready,
    Running,
    Terminal(NodeStatus),
}

impl NodeState {
    fn terminal_status(&self) -> Option<NodeStatus> {
        match self {
            NodeState::Terminal(status) => Some(*status),
            _ => None,
        }
    }
}

/// Topologically executes a validated plan.
///
/// The scheduler is the single writer over per-node state: workers run the
/// invoker on spawned tasks and report back through one commit channel.
/// Dispatch picks the smallest READY node id first, so terminal statuses and
/// outputs are a pure function of the plan plus tool outcomes, regardless of
/// the worker-pool bound.
pub struct Orchestrator {
    invoker: Arc<ToolInvoker>,
    max_concurrent_tools: usize,
    events: Option<EventSender>,
}

impl Orchestrator {
    pub fn new(invoker: Arc<ToolInvoker>, config: &SmithConfig) -> Self {
        Orchestrator {
            invoker,
            max_concurrent_tools: config.max_concurrent_tools.max(1),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn execute(&self, dag: &Dag, agent_id: &str) -> RunResult {
        let nodes: HashMap<usize, &DagNode> = dag.nodes.iter().map(|n| (n.id, n)).collect();
        let mut states: HashMap<usize, NodeState> =
            nodes.keys().map(|id| (*id, NodeState::Pending)).collect();
        let mut outputs: HashMap<usize, Value> = HashMap::new();
        let mut trace: Trace = Vec::new();

        let cancel = CancellationToken::new();
        let (commit_tx, mut commit_rx) = mpsc::unbounded_channel::<ExecutionRecord>();
        let mut running = 0usize;
        let mut halted = false;

        let outcome = loop {
            if !halted {
                promote_ready(&nodes, &mut states);

                while running < self.max_concurrent_tools {
                    let Some(id) = smallest_ready(&states) else {
                        break;
                    };
                    states.insert(id, NodeState::Running);
                    running += 1;
                    self.dispatch(nodes[&id], &outputs, agent_id, &cancel, &commit_tx);
                }
            }

            if states
                .values()
                .all(|s| matches!(s, NodeState::Terminal(_)))
            {
                break if halted {
                    RunOutcome::Halted
                } else {
                    RunOutcome::Completed
                };
            }

            if running == 0 {
                log::warn!(
                    "no node is runnable but {} remain pending; run is blocked",
                    states
                        .values()
                        .filter(|s| matches!(s, NodeState::Pending))
                        .count()
                );
                break RunOutcome::Blocked;
            }

            let Some(record) = commit_rx.recv().await else {
                break RunOutcome::Blocked;
            };
            running -= 1;
            halted |= self.commit(record, &nodes, &mut states, &mut outputs, &mut trace, &cancel);
        };

        let statuses: HashMap<usize, NodeStatus> = states
            .iter()
            .filter_map(|(id, state)| state.terminal_status().map(|s| (*id, s)))
            .collect();

        let final_output = match statuses.get(&dag.final_output_node) {
            Some(NodeStatus::Success) => outputs.get(&dag.final_output_node).cloned(),
            _ => None,
        };

        RunResult {
            outcome,
            trace,
            statuses,
            final_output,
        }
    }

    fn dispatch(
        &self,
        node: &DagNode,
        outputs: &HashMap<usize, Value>,
        agent_id: &str,
        cancel: &CancellationToken,
        commit_tx: &mpsc::UnboundedSender<ExecutionRecord>,
    ) {
        let resolved = resolve_inputs(node, outputs);
        emit(
            &self.events,
            EngineEvent::ToolStart {
                node_id: node.id,
                tool: node.tool.clone(),
            },
        );
        log::debug!("dispatching node {} ({})", node.id, node.tool);

        let invoker = self.invoker.clone();
        let node = node.clone();
        let ctx = InvokeContext {
            agent_id: agent_id.to_string(),
            cancel: cancel.clone(),
        };
        let commit_tx = commit_tx.clone();
        tokio::spawn(async move {
            let record = invoker.invoke(&node, resolved, &ctx).await;
            let _ = commit_tx.send(record);
        });
    }

    /// Applies one worker commit. Returns true when this commit halts the
    /// run, in which case every node not yet running is skipped on the spot.
    fn commit(
        &self,
        record: ExecutionRecord,
        nodes: &HashMap<usize, &DagNode>,
        states: &mut HashMap<usize, NodeState>,
        outputs: &mut HashMap<usize, Value>,
        trace: &mut Trace,
        cancel: &CancellationToken,
    ) -> bool {
        let id = record.node_id;
        states.insert(id, NodeState::Terminal(record.status));
        outputs.insert(id, record.output.clone());
        emit(
            &self.events,
            EngineEvent::ToolComplete {
                node_id: id,
                status: record.status,
                duration: record.duration(),
            },
        );

        let failed = record.status.is_failure();
        let halts = failed
            && nodes
                .get(&id)
                .map(|n| n.on_fail == OnFail::Halt)
                .unwrap_or(false);
        if failed {
            log::warn!(
                "node {id} terminated as {} ({})",
                record.status,
                record.error_message.as_deref().unwrap_or("no message")
            );
        }
        trace.push(record);

        if halts {
            log::warn!("node {id} failed with on_fail=halt; terminating run");
            cancel.cancel();
            self.skip_remaining(states, trace);
        }
        halts
    }

    fn skip_remaining(&self, states: &mut HashMap<usize, NodeState>, trace: &mut Trace) {
        let mut to_skip: Vec<usize> = states
            .iter()
            .filter(|(_, s)| matches!(s, NodeState::Pending | NodeState::Ready))
            .map(|(id, _)| *id)
            .collect();
        to_skip.sort_unstable();

        for id in to_skip {
            states.insert(id, NodeState::Terminal(NodeStatus::Skipped));
            let now = unix_ts();
            trace.push(ExecutionRecord {
                node_id: id,
                inputs_resolved: Value::Null,
                output: Value::Null,
                status: NodeStatus::Skipped,
                attempts: 0,
                start_ts: now,
                end_ts: now,
                error_message: Some("skipped: upstream failure halted execution".to_string()),
            });
            emit(
                &self.events,
                EngineEvent::ToolComplete {
                    node_id: id,
                    status: NodeStatus::Skipped,
                    duration: 0.0,
                },
            );
        }
    }
}

fn promote_ready(nodes: &HashMap<usize, &DagNode>, states: &mut HashMap<usize, NodeState>) {
    let pending: Vec<usize> = states
        .iter()
        .filter(|(_, s)| matches!(s, NodeState::Pending))
        .map(|(id, _)| *id)
        .collect();

    for id in pending {
        let deps_terminal = nodes[&id].depends_on.iter().all(|dep| {
            states
                .get(dep)
                .map(|s| matches!(s, NodeState::Terminal(_)))
                .unwrap_or(false)
        });
        if deps_terminal {
            states.insert(id, NodeState::Ready);
        }
    }
}

fn smallest_ready(states: &HashMap<usize, NodeState>) -> Option<usize> {
    states
        .iter()
        .filter(|(_, s)| matches!(s, NodeState::Ready))
        .map(|(id, _)| *id)
        .min()
}

/// Substitutes `$<id>` references with published upstream outputs. A string
/// that is exactly one reference takes the output value itself; embedded
/// references take its text rendering. Missing outputs become `null`.
fn resolve_inputs(node: &DagNode, outputs: &HashMap<usize, Value>) -> Value {
    let mut resolved = node.inputs.clone();
    for value in resolved.values_mut() {
        substitute(value, outputs);
    }
    Value::Object(resolved)
}

fn substitute(value: &mut Value, outputs: &HashMap<usize, Value>) {
    match value {
        Value::String(s) => {
            if let Some(id) = whole_reference(s) {
                *value = outputs.get(&id).cloned().unwrap_or(Value::Null);
            } else if reference_regex().is_match(s) {
                let rewritten = reference_regex().replace_all(s, |caps: &regex::Captures| {
                    let id: usize = caps[1].parse().unwrap_or(usize::MAX);
                    inline_rendering(outputs.get(&id))
                });
                *s = rewritten.into_owned();
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute(item, outputs);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                substitute(item, outputs);
            }
        }
        _ => {}
    }
}

fn inline_rendering(output: Option<&Value>) -> String {
    match output {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
