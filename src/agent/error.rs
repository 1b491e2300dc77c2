use thiserror::Error;

use crate::llm::LLMError;
use crate::planner::PlannerError;
use crate::tools::ToolError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Planner error: {0}")]
    Planner(#[from] PlannerError),

    #[error("LLM error: {0}")]
    LLM(#[from] LLMError),

    #[error("Tool registry error: {0}")]
    Tool(#[from] ToolError),

    #[error("Sub-agent depth limit reached at depth {depth}")]
    DepthExceeded { depth: u32 },

    #[error("Fleet decomposition failed: {0}")]
    DecompositionFailed(String),

    #[error("All {count} fleet peers failed")]
    FleetFailed { count: usize },
}

impl AgentError {
    /// Process exit-code mapping: planner failures exit 2, everything else
    /// is a generic failure. Run outcomes map through `RunOutcome::exit_code`.
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentError::Planner(_) => 2,
            _ => 1,
        }
    }
}
