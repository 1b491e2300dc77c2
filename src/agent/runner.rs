use std::sync::Arc;

use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::agent::prompt::render_synthesis_prompt;
use crate::agent::{AgentError, AgentTree, SubAgentTool};
use crate::config::SmithConfig;
use crate::engine::{
    ApprovalHandler, Orchestrator, RateLimiter, ResourceLockManager, RunOutcome, ToolInvoker,
};
use crate::llm::LLM;
use crate::planner::Planner;
use crate::schemas::{emit, Dag, EngineEvent, EventSender, Trace};
use crate::tools::ToolRegistry;

/// The outcome of one full agent run.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub trace: Trace,
    pub dag: Dag,
    pub final_output: Option<serde_json::Value>,
    /// Synthesized narrative answer; absent when the run halted.
    pub answer: Option<String>,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }
}

/// Composes the full pipeline: plan → execute → synthesize, emitting the
/// engine event stream along the way. Sub-agents and fleet peers are nested
/// runners sharing this runner's agent tree, serialization gate, rate
/// limiter, and lock manager.
pub struct AgentRunner {
    llm: Box<dyn LLM>,
    registry: Arc<ToolRegistry>,
    config: SmithConfig,
    events: Option<EventSender>,
    approval: Option<Arc<dyn ApprovalHandler>>,
    tree: Arc<AgentTree>,
    gate: Arc<Semaphore>,
    rate: Arc<RateLimiter>,
    locks: Arc<ResourceLockManager>,
    sub_agents: bool,
}

impl AgentRunner {
    /// `registry` is the plain tool catalog; the reserved `sub_agent` tool
    /// is installed per run while sub-agents are enabled.
    pub fn new(
        llm: impl Into<Box<dyn LLM>>,
        registry: Arc<ToolRegistry>,
        config: SmithConfig,
    ) -> Self {
        let rate = Arc::new(RateLimiter::from_registry(&registry, &config));
        AgentRunner {
            llm: llm.into(),
            registry,
            tree: Arc::new(AgentTree::new(config.max_subagent_depth)),
            gate: Arc::new(Semaphore::new(1)),
            rate,
            locks: Arc::new(ResourceLockManager::new()),
            config,
            events: None,
            approval: None,
            sub_agents: true,
        }
    }

    pub(crate) fn nested(
        llm: Box<dyn LLM>,
        registry: Arc<ToolRegistry>,
        config: SmithConfig,
        tree: Arc<AgentTree>,
        gate: Arc<Semaphore>,
        rate: Arc<RateLimiter>,
        locks: Arc<ResourceLockManager>,
    ) -> Self {
        AgentRunner {
            llm,
            registry,
            config,
            events: None,
            approval: None,
            tree,
            gate,
            rate,
            locks,
            sub_agents: true,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_approval(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval = Some(handler);
        self
    }

    pub fn with_sub_agents(mut self, enabled: bool) -> Self {
        self.sub_agents = enabled;
        self
    }

    pub fn tree(&self) -> &Arc<AgentTree> {
        &self.tree
    }

    pub async fn run(&self, utterance: &str) -> Result<RunReport, AgentError> {
        let agent_id = self.tree.register_root(utterance);
        self.run_as(agent_id, utterance).await
    }

    pub(crate) async fn run_as(
        &self,
        agent_id: Uuid,
        utterance: &str,
    ) -> Result<RunReport, AgentError> {
        emit(&self.events, EngineEvent::Planning);

        let registry = self.run_registry(agent_id)?;
        let planner = Planner::new(
            self.llm.clone_box(),
            registry.clone(),
            self.config.clone(),
        );
        let dag = match planner.plan(utterance).await {
            Ok(dag) => dag,
            Err(err) => {
                emit(
                    &self.events,
                    EngineEvent::Error {
                        message: "planning failed".to_string(),
                        details: err.to_string(),
                    },
                );
                self.tree.complete(agent_id, false, None);
                return Err(err.into());
            }
        };

        let mut tools: Vec<String> = dag.nodes.iter().map(|n| n.tool.clone()).collect();
        tools.sort();
        tools.dedup();
        emit(
            &self.events,
            EngineEvent::PlanComplete {
                num_nodes: dag.nodes.len(),
                tools,
            },
        );

        let mut invoker = ToolInvoker::new(
            registry,
            self.rate.clone(),
            self.locks.clone(),
            &self.config,
        );
        if let Some(approval) = &self.approval {
            invoker = invoker.with_approval(approval.clone());
        }
        let mut orchestrator = Orchestrator::new(Arc::new(invoker), &self.config);
        if let Some(events) = &self.events {
            orchestrator = orchestrator.with_events(events.clone());
        }

        let result = orchestrator.execute(&dag, &agent_id.to_string()).await;

        // A halted run skips synthesis; a blocked run still synthesizes over
        // the partial trace.
        let answer = match result.outcome {
            RunOutcome::Halted => {
                emit(
                    &self.events,
                    EngineEvent::Error {
                        message: "execution halted".to_string(),
                        details: "a node with on_fail=halt failed".to_string(),
                    },
                );
                None
            }
            RunOutcome::Completed | RunOutcome::Blocked => {
                let prompt = render_synthesis_prompt(utterance, &result.trace);
                match self.llm.invoke(&prompt).await {
                    Ok(answer) => {
                        emit(
                            &self.events,
                            EngineEvent::FinalAnswer {
                                response: answer.clone(),
                            },
                        );
                        Some(answer)
                    }
                    Err(err) => {
                        self.tree.complete(agent_id, false, None);
                        return Err(err.into());
                    }
                }
            }
        };

        self.tree
            .complete(agent_id, answer.is_some(), answer.clone());

        Ok(RunReport {
            outcome: result.outcome,
            trace: result.trace,
            dag,
            final_output: result.final_output,
            answer,
        })
    }

    /// The catalog a specific run plans against: the base registry, plus a
    /// `sub_agent` tool bound to this run's agent identity.
    fn run_registry(&self, agent_id: Uuid) -> Result<Arc<ToolRegistry>, AgentError> {
        if !self.sub_agents {
            return Ok(self.registry.clone());
        }
        let tool = SubAgentTool::new(
            self.llm.clone_box(),
            self.registry.clone(),
            self.config.clone(),
            self.tree.clone(),
            self.gate.clone(),
            self.rate.clone(),
            self.locks.clone(),
            agent_id,
        );
        let registry = self
            .registry
            .with_entry(SubAgentTool::descriptor(), Arc::new(tool))?;
        Ok(Arc::new(registry))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schemas::NodeStatus;
    use crate::testing::{test_registry, ScriptedLLM};
    use crate::tools::{FunctionTool, ToolDescriptor, ToolRegistry};

    fn valid_plan() -> String {
        json!({
            "nodes": [
                {"id": 0, "tool": "web_search", "inputs": {"query": "rust"},
                 "metadata": {"purpose": "gather material"}}
            ],
            "final_output_node": 0
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_run_plans_executes_and_synthesizes() {
        let llm = ScriptedLLM::new([valid_plan(), "final answer".to_string()]);
        let runner = AgentRunner::new(
            llm.clone(),
            Arc::new(test_registry()),
            SmithConfig::default(),
        );

        let report = runner.run("look up rust").await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.answer.as_deref(), Some("final answer"));
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.trace.len(), 1);
        assert_eq!(report.trace[0].status, NodeStatus::Success);

        // The synthesis prompt carries the trace, not the raw utterance only.
        let synthesis_prompt = llm.prompt_of_call(1);
        assert!(synthesis_prompt.contains("look up rust"));
        assert!(synthesis_prompt.contains("results for"));
    }

    #[tokio::test]
    async fn test_event_stream_covers_the_whole_run() {
        let llm = ScriptedLLM::new([valid_plan(), "done".to_string()]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let runner = AgentRunner::new(
            llm,
            Arc::new(test_registry()),
            SmithConfig::default(),
        )
        .with_events(tx);

        runner.run("look up rust").await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                EngineEvent::Planning => "planning",
                EngineEvent::PlanComplete { .. } => "plan_complete",
                EngineEvent::ToolStart { .. } => "tool_start",
                EngineEvent::ToolComplete { .. } => "tool_complete",
                EngineEvent::FinalAnswer { .. } => "final_answer",
                EngineEvent::Error { .. } => "error",
            });
        }
        assert_eq!(
            kinds,
            vec![
                "planning",
                "plan_complete",
                "tool_start",
                "tool_complete",
                "final_answer"
            ]
        );
    }

    #[tokio::test]
    async fn test_planner_failure_emits_error_and_exits_2() {
        let llm = ScriptedLLM::new(["garbage", "garbage", "garbage"]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let runner = AgentRunner::new(
            llm,
            Arc::new(test_registry()),
            SmithConfig::default(),
        )
        .with_events(tx);

        let err = runner.run("look up rust").await.unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let mut saw_error_event = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, EngineEvent::Error { .. }) {
                saw_error_event = true;
            }
        }
        assert!(saw_error_event);
    }

    #[tokio::test]
    async fn test_halted_run_skips_synthesis() {
        let registry = ToolRegistry::builder()
            .descriptor(ToolDescriptor::new("always_fails", "fail.fn"))
            .function(
                "fail.fn",
                FunctionTool::new(|_| Err("broken backend".into())),
            )
            .build()
            .unwrap();
        let plan = json!({
            "nodes": [
                {"id": 0, "tool": "always_fails", "inputs": {}, "retry": 0,
                 "on_fail": "halt"}
            ],
            "final_output_node": 0
        })
        .to_string();

        let llm = ScriptedLLM::new([plan]);
        let runner = AgentRunner::new(llm.clone(), Arc::new(registry), SmithConfig::default());

        let report = runner.run("do the thing").await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Halted);
        assert!(report.answer.is_none());
        assert_eq!(report.exit_code(), 3);
        // Only the planning call happened; no synthesis request went out.
        assert_eq!(llm.call_count(), 1);
    }
}
