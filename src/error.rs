use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid parameters for {operation}: {message}")]
    InvalidParams { operation: String, message: String },

    #[error("Operation {0} is disabled")]
    Disabled(String),

    #[error(transparent)]
    Exec(#[from] code_exec::Error),
}

impl ToolError {
    /// Stable snake_case code for callers that branch on the failure.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::UnknownOperation(_) => "unknown_operation",
            ToolError::InvalidParams { .. } => "invalid_params",
            ToolError::Disabled(_) => "disabled",
            ToolError::Exec(e) => e.kind().as_str(),
        }
    }

    pub(crate) fn invalid_params(operation: &str, message: impl ToString) -> Self {
        ToolError::InvalidParams {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }
}
