use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::agent::prompt::{render_decompose_prompt, render_fleet_synthesis_prompt};
use crate::agent::{AgentError, AgentRunner, AgentTree};
use crate::config::SmithConfig;
use crate::engine::{RateLimiter, ResourceLockManager};
use crate::llm::LLM;
use crate::planner::parse_helper::parse_candidate_json;
use crate::tools::ToolRegistry;

/// One peer's slot in the fleet result vector. A failed peer keeps its slot;
/// it never aborts the fleet.
#[derive(Debug)]
pub struct PeerResult {
    pub task: String,
    pub answer: Option<String>,
    pub error: Option<String>,
}

impl PeerResult {
    pub fn is_success(&self) -> bool {
        self.answer.is_some()
    }
}

#[derive(Debug)]
pub struct FleetReport {
    pub answer: String,
    pub peers: Vec<PeerResult>,
}

/// One-shot parallel pattern: decompose a goal into independent sub-tasks,
/// run each as a peer agent, synthesize the survivors.
///
/// Peers run concurrently with respect to one another; their internal
/// sub-agents still serialize through the shared gate.
pub struct FleetCoordinator {
    llm: Box<dyn LLM>,
    registry: Arc<ToolRegistry>,
    config: SmithConfig,
    tree: Arc<AgentTree>,
    gate: Arc<Semaphore>,
    rate: Arc<RateLimiter>,
    locks: Arc<ResourceLockManager>,
}

impl FleetCoordinator {
    pub fn new(
        llm: impl Into<Box<dyn LLM>>,
        registry: Arc<ToolRegistry>,
        config: SmithConfig,
    ) -> Self {
        let rate = Arc::new(RateLimiter::from_registry(&registry, &config));
        FleetCoordinator {
            llm: llm.into(),
            tree: Arc::new(AgentTree::new(config.max_subagent_depth)),
            gate: Arc::new(Semaphore::new(1)),
            rate,
            locks: Arc::new(ResourceLockManager::new()),
            registry,
            config,
        }
    }

    pub async fn run(&self, goal: &str) -> Result<FleetReport, AgentError> {
        let tasks = self.decompose(goal).await?;
        log::debug!("fleet of {} peers for goal: {goal}", tasks.len());

        let peers = join_all(tasks.into_iter().map(|task| {
            let runner = AgentRunner::nested(
                self.llm.clone_box(),
                self.registry.clone(),
                self.config.clone(),
                self.tree.clone(),
                self.gate.clone(),
                self.rate.clone(),
                self.locks.clone(),
            );
            async move {
                match runner.run(&task).await {
                    Ok(report) if report.answer.is_some() => PeerResult {
                        task,
                        answer: report.answer,
                        error: None,
                    },
                    Ok(report) => PeerResult {
                        task,
                        answer: None,
                        error: Some(format!("run ended {:?}", report.outcome)),
                    },
                    Err(err) => {
                        log::warn!("fleet peer failed: {err}");
                        PeerResult {
                            task,
                            answer: None,
                            error: Some(err.to_string()),
                        }
                    }
                }
            }
        }))
        .await;

        if peers.iter().all(|peer| !peer.is_success()) {
            return Err(AgentError::FleetFailed { count: peers.len() });
        }

        let answer = self
            .llm
            .invoke(&render_fleet_synthesis_prompt(goal, &peers))
            .await?;
        Ok(FleetReport { answer, peers })
    }

    /// LLM-driven decomposition into at most `max_fleet_size` sub-tasks.
    async fn decompose(&self, goal: &str) -> Result<Vec<String>, AgentError> {
        let raw = self
            .llm
            .invoke(&render_decompose_prompt(goal, self.config.max_fleet_size))
            .await?;
        let value = parse_candidate_json(&raw).ok_or_else(|| {
            AgentError::DecompositionFailed("response is not valid JSON".to_string())
        })?;
        let Some(items) = value.as_array() else {
            return Err(AgentError::DecompositionFailed(
                "expected a JSON array of sub-tasks".to_string(),
            ));
        };

        let mut tasks: Vec<String> = items
            .iter()
            .filter_map(|item| item.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if tasks.is_empty() {
            return Err(AgentError::DecompositionFailed(
                "decomposition produced no sub-tasks".to_string(),
            ));
        }
        if tasks.len() > self.config.max_fleet_size {
            log::warn!(
                "decomposition produced {} sub-tasks; truncating to {}",
                tasks.len(),
                self.config.max_fleet_size
            );
            tasks.truncate(self.config.max_fleet_size);
        }
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::RouterLLM;
    use crate::tools::{FunctionTool, ToolDescriptor};

    fn probe_registry() -> ToolRegistry {
        ToolRegistry::builder()
            .descriptor(ToolDescriptor::new("probe", "probe.fn"))
            .function("probe.fn", FunctionTool::new(|_| Ok(json!("probed"))))
            .build()
            .unwrap()
    }

    fn probe_plan() -> String {
        json!({
            "nodes": [{"id": 0, "tool": "probe", "inputs": {}, "retry": 0}],
            "final_output_node": 0
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_fleet_decomposes_runs_and_synthesizes() {
        let llm = RouterLLM::new([
            ("peer results", "fleet answer".to_string()),
            ("sub-tasks", json!(["task one", "task two"]).to_string()),
            ("execution trace", "peer answer".to_string()),
            ("planning compiler", probe_plan()),
        ]);
        let fleet = FleetCoordinator::new(
            llm,
            Arc::new(probe_registry()),
            SmithConfig::default(),
        );

        let report = fleet.run("big goal").await.unwrap();
        assert_eq!(report.answer, "fleet answer");
        assert_eq!(report.peers.len(), 2);
        assert!(report.peers.iter().all(|p| p.is_success()));
    }

    #[tokio::test]
    async fn test_peer_failure_is_isolated() {
        // The peer whose task mentions "doomed" gets unplannable garbage.
        let llm = RouterLLM::new([
            ("peer results", "fleet answer".to_string()),
            ("sub-tasks", json!(["healthy task", "doomed task"]).to_string()),
            ("doomed", "not a plan at all".to_string()),
            ("execution trace", "peer answer".to_string()),
            ("planning compiler", probe_plan()),
        ]);
        let fleet = FleetCoordinator::new(
            llm,
            Arc::new(probe_registry()),
            SmithConfig::default(),
        );

        let report = fleet.run("big goal").await.unwrap();
        assert_eq!(report.answer, "fleet answer");
        assert_eq!(report.peers.len(), 2);

        let healthy = report.peers.iter().find(|p| p.task == "healthy task").unwrap();
        assert!(healthy.is_success());
        let doomed = report.peers.iter().find(|p| p.task == "doomed task").unwrap();
        assert!(!doomed.is_success());
        assert!(doomed.error.is_some());
    }

    #[tokio::test]
    async fn test_all_peers_failed_is_an_error() {
        let llm = RouterLLM::new([
            ("sub-tasks", json!(["doomed task"]).to_string()),
            ("doomed", "not a plan at all".to_string()),
        ]);
        let fleet = FleetCoordinator::new(
            llm,
            Arc::new(probe_registry()),
            SmithConfig::default(),
        );

        let err = fleet.run("big goal").await.unwrap_err();
        assert!(matches!(err, AgentError::FleetFailed { count: 1 }));
    }

    #[tokio::test]
    async fn test_decomposition_is_bounded_by_fleet_size() {
        let llm = RouterLLM::new([
            ("peer results", "fleet answer".to_string()),
            (
                "sub-tasks",
                json!(["t1", "t2", "t3", "t4"]).to_string(),
            ),
            ("execution trace", "peer answer".to_string()),
            ("planning compiler", probe_plan()),
        ]);
        let config = SmithConfig::default().with_max_fleet_size(2);
        let fleet = FleetCoordinator::new(llm, Arc::new(probe_registry()), config);

        let report = fleet.run("big goal").await.unwrap();
        assert_eq!(report.peers.len(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_decomposition_is_an_error() {
        let llm = RouterLLM::new([("sub-tasks", "no list here".to_string())]);
        let fleet = FleetCoordinator::new(
            llm,
            Arc::new(probe_registry()),
            SmithConfig::default(),
        );

        let err = fleet.run("big goal").await.unwrap_err();
        assert!(matches!(err, AgentError::DecompositionFailed(_)));
    }
}
