use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AutomationError {
    #[error("Invalid configuration entry: {0}")]
    ConfigLoad(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("No path found from {from} to {to}")]
    NoPathFound { from: String, to: String },

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Action failed: {0}")]
    ActionFailed(String),

    #[error("Step validation failed: expected {expected}, observed {observed}")]
    StepValidationFailed { expected: String, observed: String },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Execution cancelled: {0}")]
    Cancelled(String),

    #[error("Plan is already executing: {0}")]
    PlanBusy(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AutomationError {
    /// Whether the failure may go away on its own, e.g. an element that has not
    /// rendered yet. Wrong-screen failures are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AutomationError::ElementNotFound(_))
    }

    /// Failures detected before anything is sent to the device.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            AutomationError::ConfigLoad(_)
                | AutomationError::MissingParameter(_)
                | AutomationError::NoPathFound { .. }
                | AutomationError::UnknownNode(_)
                | AutomationError::UnknownFunction(_)
        )
    }
}
