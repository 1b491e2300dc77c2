use std::error::Error;

use async_trait::async_trait;
use serde_json::Value;

/// A stateless callable resolved through the registry.
///
/// Metadata (name, parameter schema, safety and resource flags) lives on the
/// [`ToolDescriptor`](super::ToolDescriptor); the callable itself only sees
/// already-validated inputs and returns a serializable value.
#[async_trait]
pub trait Tool: Send + Sync {
    async fn call(&self, inputs: Value) -> Result<Value, Box<dyn Error + Send + Sync>>;
}

/// Adapter turning a plain closure into a [`Tool`].
///
/// # Usage
/// ```rust,ignore
/// let echo = FunctionTool::new(|inputs| Ok(inputs["text"].clone()));
/// ```
pub struct FunctionTool<F>
where
    F: Fn(Value) -> Result<Value, Box<dyn Error + Send + Sync>> + Send + Sync,
{
    func: F,
}

impl<F> FunctionTool<F>
where
    F: Fn(Value) -> Result<Value, Box<dyn Error + Send + Sync>> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        FunctionTool { func }
    }
}

#[async_trait]
impl<F> Tool for FunctionTool<F>
where
    F: Fn(Value) -> Result<Value, Box<dyn Error + Send + Sync>> + Send + Sync,
{
    async fn call(&self, inputs: Value) -> Result<Value, Box<dyn Error + Send + Sync>> {
        (self.func)(inputs)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_function_tool_call() {
        let tool = FunctionTool::new(|inputs| Ok(json!({"echo": inputs["text"]})));
        let out = tool.call(json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, json!({"echo": "hi"}));
    }
}
