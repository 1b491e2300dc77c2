use async_trait::async_trait;

use crate::llm::LLMError;
use crate::schemas::Message;

/// Contract of the language-model collaborator.
///
/// The planner consults it to produce plan candidates and repairs; the agent
/// layer consults it for decomposition and final synthesis. The runtime
/// downstream of planning never calls it for control decisions.
#[async_trait]
pub trait LLM: Sync + Send + LLMClone {
    async fn generate(&self, messages: Vec<Message>) -> Result<String, LLMError>;

    async fn invoke(&self, prompt: &str) -> Result<String, LLMError> {
        self.generate(vec![Message::new_human_message(prompt)]).await
    }
}

pub trait LLMClone {
    fn clone_box(&self) -> Box<dyn LLM>;
}

impl<T> LLMClone for T
where
    T: 'static + LLM + Clone,
{
    fn clone_box(&self) -> Box<dyn LLM> {
        Box::new(self.clone())
    }
}

impl<L> From<L> for Box<dyn LLM>
where
    L: 'static + LLM,
{
    fn from(llm: L) -> Self {
        Box::new(llm)
    }
}
