use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::agent::{AgentRunner, AgentTree};
use crate::config::SmithConfig;
use crate::engine::{RateLimiter, ResourceLockManager};
use crate::llm::LLM;
use crate::tools::{FieldSpec, FieldType, Tool, ToolDescriptor, ToolParameters, ToolRegistry};

pub const SUB_AGENT_TOOL_NAME: &str = "sub_agent";

/// The reserved delegation tool: a full nested run (planner + orchestrator +
/// synthesis) spawned from inside a node.
///
/// A process-wide gate serializes top-level sub-agents, the documented
/// trade-off against rate-limit cascades: independent sub-agents within one
/// plan execute in arrival order even when the plan would allow parallelism.
/// Sub-agents spawned by a sub-agent do not re-acquire the gate (their
/// ancestor already holds it); recursion is bounded by the agent tree's
/// depth check instead.
pub struct SubAgentTool {
    llm: Box<dyn LLM>,
    registry: Arc<ToolRegistry>,
    config: SmithConfig,
    tree: Arc<AgentTree>,
    gate: Arc<Semaphore>,
    rate: Arc<RateLimiter>,
    locks: Arc<ResourceLockManager>,
    parent_id: Uuid,
}

impl SubAgentTool {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        llm: Box<dyn LLM>,
        registry: Arc<ToolRegistry>,
        config: SmithConfig,
        tree: Arc<AgentTree>,
        gate: Arc<Semaphore>,
        rate: Arc<RateLimiter>,
        locks: Arc<ResourceLockManager>,
        parent_id: Uuid,
    ) -> Self {
        SubAgentTool {
            llm,
            registry,
            config,
            tree,
            gate,
            rate,
            locks,
            parent_id,
        }
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(SUB_AGENT_TOOL_NAME, "agent.sub_agent")
            .with_description(
                "Delegates a self-contained task to a nested agent and returns its answer",
            )
            .with_domain("agent")
            .with_parameters(
                ToolParameters::builder()
                    .property(
                        "task",
                        FieldSpec::new(FieldType::String)
                            .with_description("The task to delegate"),
                        true,
                    )
                    .property(
                        "parent_agent_id",
                        FieldSpec::new(FieldType::String)
                            .with_description("Id of the delegating agent"),
                        false,
                    )
                    .build(),
            )
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    async fn call(&self, inputs: Value) -> Result<Value, Box<dyn Error + Send + Sync>> {
        let task = inputs["task"]
            .as_str()
            .ok_or("sub_agent requires a string \"task\" input")?;

        let child_id = self.tree.spawn_child(self.parent_id, task)?;

        let _slot = if self.tree.depth(self.parent_id) == 0 {
            Some(self.gate.acquire().await?)
        } else {
            None
        };

        log::debug!("sub-agent {child_id} starting task: {task}");
        let runner = AgentRunner::nested(
            self.llm.clone_box(),
            self.registry.clone(),
            self.config.clone(),
            self.tree.clone(),
            self.gate.clone(),
            self.rate.clone(),
            self.locks.clone(),
        );
        let report = runner.run_as(child_id, task).await?;

        match report.answer {
            Some(answer) => Ok(Value::String(answer)),
            None => Err(format!(
                "sub-agent run ended without an answer (outcome: {:?})",
                report.outcome
            )
            .into()),
        }
    }
}
