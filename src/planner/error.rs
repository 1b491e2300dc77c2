use thiserror::Error;

use crate::llm::LLMError;

#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("LLM error: {0}")]
    LLMError(#[from] LLMError),

    #[error("Plan rejected after {attempts} attempts: {reason}")]
    Exhausted {
        attempts: u32,
        reason: String,
        last_candidate: Option<String>,
    },
}
