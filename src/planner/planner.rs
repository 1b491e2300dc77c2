use std::sync::Arc;

use crate::config::SmithConfig;
use crate::llm::LLM;
use crate::planner::parse_helper::parse_candidate_json;
use crate::planner::prompt::{
    render_repair_prompt, render_syntax_repair_prompt, render_system_prompt,
};
use crate::planner::validator::validate_dag;
use crate::planner::PlannerError;
use crate::schemas::{Dag, Message};
use crate::tools::ToolRegistry;
use crate::utils::helper::truncate_for_log;

const DEFAULT_MAX_REPAIRS: u32 = 2;

enum CompileFailure {
    Parse(String),
    Validation(String),
}

/// Compiles an utterance plus the tool catalog into a validated [`Dag`].
///
/// The language model is consulted once per candidate; malformed candidates
/// are fed back with the offending error for a bounded number of repairs.
/// On success the returned plan is fully normalized and carries concrete
/// retry/timeout values, so the orchestrator never re-consults the model.
pub struct Planner {
    llm: Box<dyn LLM>,
    registry: Arc<ToolRegistry>,
    config: SmithConfig,
    max_repairs: u32,
}

impl Planner {
    pub fn new(
        llm: impl Into<Box<dyn LLM>>,
        registry: Arc<ToolRegistry>,
        config: SmithConfig,
    ) -> Self {
        Planner {
            llm: llm.into(),
            registry,
            config,
            max_repairs: DEFAULT_MAX_REPAIRS,
        }
    }

    pub fn with_max_repairs(mut self, max_repairs: u32) -> Self {
        self.max_repairs = max_repairs;
        self
    }

    pub async fn plan(&self, utterance: &str) -> Result<Dag, PlannerError> {
        let mut messages = vec![
            Message::new_system_message(render_system_prompt(&self.registry)),
            Message::new_human_message(utterance),
        ];

        let attempts = 1 + self.max_repairs;
        let mut syntax_repair_spent = false;
        let mut last_candidate = None;
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            let candidate = self.llm.generate(messages.clone()).await?;
            last_candidate = Some(candidate.clone());

            match self.compile(&candidate, utterance) {
                Ok(dag) => {
                    log::debug!(
                        "plan accepted on attempt {attempt} with {} nodes",
                        dag.nodes.len()
                    );
                    return Ok(dag);
                }
                Err(CompileFailure::Parse(reason)) => {
                    log::warn!(
                        "plan candidate unparseable on attempt {attempt}: {}",
                        truncate_for_log(&reason, 200)
                    );
                    let repair = if syntax_repair_spent {
                        render_repair_prompt(&reason)
                    } else {
                        syntax_repair_spent = true;
                        render_syntax_repair_prompt(&reason)
                    };
                    messages.push(Message::new_ai_message(&candidate));
                    messages.push(Message::new_human_message(repair));
                    last_reason = reason;
                }
                Err(CompileFailure::Validation(reason)) => {
                    log::warn!(
                        "plan candidate invalid on attempt {attempt}: {}",
                        truncate_for_log(&reason, 200)
                    );
                    messages.push(Message::new_ai_message(&candidate));
                    messages.push(Message::new_human_message(render_repair_prompt(&reason)));
                    last_reason = reason;
                }
            }
        }

        Err(PlannerError::Exhausted {
            attempts,
            reason: last_reason,
            last_candidate,
        })
    }

    fn compile(&self, raw: &str, utterance: &str) -> Result<Dag, CompileFailure> {
        let value = parse_candidate_json(raw)
            .ok_or_else(|| CompileFailure::Parse("response is not valid JSON".to_string()))?;
        let mut dag: Dag = serde_json::from_value(value)
            .map_err(|e| CompileFailure::Parse(format!("response is not a plan object: {e}")))?;
        validate_dag(&mut dag, &self.registry, &self.config, utterance)
            .map_err(CompileFailure::Validation)?;
        Ok(dag)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{test_registry, ScriptedLLM};

    fn planner(llm: &ScriptedLLM) -> Planner {
        Planner::new(
            llm.clone(),
            Arc::new(test_registry()),
            SmithConfig::default(),
        )
    }

    fn valid_plan() -> String {
        json!({
            "nodes": [
                {"id": 0, "tool": "web_search", "inputs": {"query": "rust"}},
                {"id": 1, "tool": "llm_synthesize", "inputs": {"prompt": "$0"},
                 "depends_on": [0], "on_fail": "continue"}
            ],
            "final_output_node": 1
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_plan_accepts_first_valid_candidate() {
        let llm = ScriptedLLM::new([valid_plan()]);
        let dag = planner(&llm).plan("find out about rust").await.unwrap();
        assert_eq!(dag.nodes.len(), 2);
        assert_eq!(dag.final_output_node, 1);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_plan_accepts_fenced_candidate() {
        let fenced = format!("Here you go:\n```json\n{}\n```", valid_plan());
        let llm = ScriptedLLM::new([fenced]);
        let dag = planner(&llm).plan("find out about rust").await.unwrap();
        assert_eq!(dag.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_repair_loop_fixes_invalid_candidate() {
        let invalid = json!({
            "nodes": [{"id": 0, "tool": "no_such_tool", "inputs": {}}],
            "final_output_node": 0
        })
        .to_string();
        let llm = ScriptedLLM::new([invalid, valid_plan()]);

        let dag = planner(&llm).plan("find out about rust").await.unwrap();
        assert_eq!(dag.nodes.len(), 2);
        assert_eq!(llm.call_count(), 2);

        let repair_prompt = llm.prompt_of_call(1);
        assert!(repair_prompt.contains("unknown tool"));
        assert!(repair_prompt.contains("rejected"));
    }

    #[tokio::test]
    async fn test_syntax_repair_pass_on_parse_failure() {
        let llm = ScriptedLLM::new(["this is not json at all".to_string(), valid_plan()]);
        let dag = planner(&llm).plan("find out about rust").await.unwrap();
        assert_eq!(dag.nodes.len(), 2);

        let repair_prompt = llm.prompt_of_call(1);
        assert!(repair_prompt.contains("could not be parsed"));
    }

    #[tokio::test]
    async fn test_exhausted_after_budget_carries_last_candidate() {
        let invalid = json!({
            "nodes": [{"id": 0, "tool": "no_such_tool", "inputs": {}}],
            "final_output_node": 0
        })
        .to_string();
        let llm = ScriptedLLM::new([invalid.clone(), invalid.clone(), invalid.clone()]);

        let err = planner(&llm).plan("anything").await.unwrap_err();
        match err {
            PlannerError::Exhausted {
                attempts,
                reason,
                last_candidate,
            } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("unknown tool"));
                assert!(last_candidate.unwrap().contains("no_such_tool"));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_cycle_candidate_never_executes() {
        let cyclic = json!({
            "nodes": [
                {"id": 0, "tool": "web_search", "inputs": {"query": "a"}, "depends_on": [1]},
                {"id": 1, "tool": "web_search", "inputs": {"query": "b"}, "depends_on": [0]}
            ],
            "final_output_node": 1
        })
        .to_string();
        let llm = ScriptedLLM::new([cyclic.clone(), cyclic.clone(), cyclic]);

        let err = planner(&llm).plan("search twice").await.unwrap_err();
        match err {
            PlannerError::Exhausted { reason, .. } => assert!(reason.contains("cycle")),
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }
}
