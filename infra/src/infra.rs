pub mod binding;
pub mod token;
pub mod workflow;

use anyhow::Result;
use entity_workflow_base::error::WorkflowTriggerError;
use serde::Deserialize;

/// How the workflow trigger finds its collaborators.
///
/// # Environment Variables
/// - `WORKFLOW_SERVICE_LABEL`: label of the workflow service binding (default: workflow)
/// - `WORKFLOW_IDENTITY_BROKER_TAG`: tag of the identity broker binding (default: xsuaa)
/// - `WORKFLOW_USER_AGENT`: user agent of outbound calls
#[derive(Deserialize, Clone, Debug)]
pub struct WorkflowTriggerConfig {
    #[serde(default = "default_service_label")]
    pub service_label: String,
    #[serde(default = "default_identity_broker_tag")]
    pub identity_broker_tag: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_service_label() -> String {
    "workflow".to_string()
}
fn default_identity_broker_tag() -> String {
    "xsuaa".to_string()
}
fn default_user_agent() -> String {
    entity_workflow_base::APP_NAME.to_string()
}

impl Default for WorkflowTriggerConfig {
    fn default() -> Self {
        tracing::info!("Use default WorkflowTriggerConfig.");
        Self {
            service_label: default_service_label(),
            identity_broker_tag: default_identity_broker_tag(),
            user_agent: default_user_agent(),
        }
    }
}

pub fn load_workflow_trigger_config_from_env() -> Result<WorkflowTriggerConfig> {
    envy::prefixed("WORKFLOW_")
        .from_env::<WorkflowTriggerConfig>()
        .map_err(|e| {
            WorkflowTriggerError::ParseError(format!(
                "cannot read workflow trigger config from env: {:?}",
                e
            ))
            .into()
        })
}

/// Shared client for every outbound call. Timeouts stay at the transport default.
pub fn new_http_client(config: &WorkflowTriggerConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .build()
        .map_err(|e| {
            WorkflowTriggerError::InvalidParameter(format!("http client build error: {e:?}"))
                .into()
        })
}
