use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Error while running tool: {0}")]
    ExecutionError(Box<dyn std::error::Error + Send + Sync>),

    #[error("Descriptor parsing error: {0}")]
    DescriptorParseError(#[from] serde_json::Error),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("No callable registered for function id: {0}")]
    UnresolvedFunction(String),

    #[error("Descriptor key {key} does not match tool name {name}")]
    NameMismatch { key: String, name: String },

    #[error("Invalid inputs for tool {tool}: {reason}")]
    InvalidInputs { tool: String, reason: String },
}

impl ToolError {
    pub fn execution_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ToolError::ExecutionError(Box::new(error))
    }
}
