use entity_workflow_base::error::WorkflowTriggerError;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NotWorkflowEntity,
    NotTaskEnabled,
    MissingTaskHeaders,
    ConfigUnavailable,
    TokenUnavailable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    TokenExchangeFailed,
    WorkflowStartRejected { status: u16 },
    WorkflowTaskUpdateRejected { status: u16 },
    TransportError,
    Other,
}

/// Result of one dispatch. Logged, never returned to the triggering request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Started { instance_id: Option<String> },
    TaskCompleted { task_instance_id: String },
    Skipped(SkipReason),
    Failed { kind: FailureKind, message: String },
}

impl DispatchOutcome {
    /// Classify an error raised while dispatching.
    pub fn from_error(e: &anyhow::Error) -> Self {
        let error = e.downcast_ref::<WorkflowTriggerError>();
        if let Some(skip) = error.filter(|err| err.is_skip()) {
            return DispatchOutcome::Skipped(match skip {
                WorkflowTriggerError::ConfigUnavailable(_) => SkipReason::ConfigUnavailable,
                _ => SkipReason::TokenUnavailable,
            });
        }
        let kind = match error {
            Some(WorkflowTriggerError::TokenExchangeFailed(_)) => FailureKind::TokenExchangeFailed,
            Some(WorkflowTriggerError::WorkflowStartRejected { status, .. }) => {
                FailureKind::WorkflowStartRejected { status: *status }
            }
            Some(WorkflowTriggerError::WorkflowTaskUpdateRejected { status, .. }) => {
                FailureKind::WorkflowTaskUpdateRejected { status: *status }
            }
            Some(WorkflowTriggerError::TransportError(_)) => FailureKind::TransportError,
            _ => FailureKind::Other,
        };
        DispatchOutcome::Failed {
            kind,
            message: e.to_string(),
        }
    }

    pub fn is_triggered(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Started { .. } | DispatchOutcome::TaskCompleted { .. }
        )
    }

    pub fn log(&self, entity: &str) {
        match self {
            DispatchOutcome::Started { instance_id } => tracing::info!(
                "Workflow \"{}\" successfully started for {}.",
                instance_id.as_deref().unwrap_or("<unknown>"),
                entity
            ),
            DispatchOutcome::TaskCompleted { task_instance_id } => tracing::info!(
                "Workflow task \"{}\" successfully updated for {}.",
                task_instance_id,
                entity
            ),
            DispatchOutcome::Skipped(SkipReason::ConfigUnavailable) => {
                tracing::error!("Failed to find the workflow service ({}).", entity)
            }
            DispatchOutcome::Skipped(reason) => {
                tracing::debug!("workflow trigger skipped for {}: {:?}", entity, reason)
            }
            DispatchOutcome::Failed { kind, message } => {
                tracing::error!("workflow trigger failed for {}: {:?} {}", entity, kind, message)
            }
        }
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchOutcome::Started { instance_id } => {
                write!(f, "started({})", instance_id.as_deref().unwrap_or("-"))
            }
            DispatchOutcome::TaskCompleted { task_instance_id } => {
                write!(f, "task_completed({task_instance_id})")
            }
            DispatchOutcome::Skipped(reason) => write!(f, "skipped({reason:?})"),
            DispatchOutcome::Failed { kind, .. } => write!(f, "failed({kind:?})"),
        }
    }
}
