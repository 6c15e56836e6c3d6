use thiserror::Error;

/// Conditions raised while triggering workflows.
///
/// None of these reach the request that caused the trigger: the dispatcher
/// catches them where they originate and turns them into a logged outcome.
#[derive(Debug, Error)]
pub enum WorkflowTriggerError {
    #[error("ConfigUnavailable({0})")]
    ConfigUnavailable(String),
    #[error("TokenUnavailable({0})")]
    TokenUnavailable(String),
    #[error("TokenExchangeFailed({0})")]
    TokenExchangeFailed(String),
    #[error("WorkflowStartRejected(status={status}, body={body})")]
    WorkflowStartRejected { status: u16, body: String },
    #[error("WorkflowTaskUpdateRejected(status={status}, body={body})")]
    WorkflowTaskUpdateRejected { status: u16, body: String },
    #[error("TransportError({0:?})")]
    TransportError(reqwest::Error),
    #[error("InvalidParameter({0})")]
    InvalidParameter(String),
    #[error("ParseError({0})")]
    ParseError(String),
    #[error("serde_json error({0:?})")]
    SerdeJsonError(serde_json::error::Error),
}

impl WorkflowTriggerError {
    /// Returns true if the condition means "do nothing" rather than a failure
    /// worth an operator's attention.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            WorkflowTriggerError::ConfigUnavailable(_) | WorkflowTriggerError::TokenUnavailable(_)
        )
    }
}

impl From<reqwest::Error> for WorkflowTriggerError {
    fn from(e: reqwest::Error) -> Self {
        WorkflowTriggerError::TransportError(e)
    }
}
impl From<serde_json::Error> for WorkflowTriggerError {
    fn from(e: serde_json::Error) -> Self {
        WorkflowTriggerError::SerdeJsonError(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_classification() {
        assert!(WorkflowTriggerError::ConfigUnavailable("workflow".to_string()).is_skip());
        assert!(WorkflowTriggerError::TokenUnavailable("no header".to_string()).is_skip());
        assert!(!WorkflowTriggerError::TokenExchangeFailed("denied".to_string()).is_skip());
        assert!(!WorkflowTriggerError::WorkflowStartRejected {
            status: 400,
            body: "bad".to_string()
        }
        .is_skip());
    }

    #[test]
    fn test_rejection_message_contains_status_and_body() {
        let e = WorkflowTriggerError::WorkflowTaskUpdateRejected {
            status: 409,
            body: "{\"error\":\"conflict\"}".to_string(),
        };
        let message = e.to_string();
        assert!(message.contains("409"));
        assert!(message.contains("conflict"));
    }
}
