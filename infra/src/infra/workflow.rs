use super::binding::WorkflowServiceConfig;
use super::token::ServiceToken;
use anyhow::Result;
use async_trait::async_trait;
use entity_workflow_base::error::WorkflowTriggerError;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const TASK_COMPLETED_STATUS: &str = "COMPLETED";

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StartInstanceRequest<'a> {
    pub definition_id: &'a str,
    pub context: &'a Map<String, Value>,
}

#[derive(Serialize, Debug)]
pub struct UpdateTaskRequest<'a> {
    pub decision: &'a str,
    pub context: &'a Map<String, Value>,
    pub status: &'a str,
}

/// Part of the created instance the trigger reports on.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub id: Option<String>,
    pub definition_id: Option<String>,
    pub status: Option<String>,
}

/// Workflow engine REST api.
///
/// Both calls are sent once. A status other than the expected one is a
/// rejection, never retried.
#[cfg_attr(feature = "test-utils", mockall::automock)]
#[async_trait]
pub trait WorkflowClient: Send + Sync {
    /// `POST /v1/workflow-instances`, expects 201
    async fn start_instance(
        &self,
        config: &WorkflowServiceConfig,
        token: &ServiceToken,
        definition_id: &str,
        context: &Map<String, Value>,
    ) -> Result<WorkflowInstance>;

    /// `PATCH /v1/task-instances/{id}`, expects 204
    async fn update_task(
        &self,
        config: &WorkflowServiceConfig,
        token: &ServiceToken,
        task_instance_id: &str,
        task_decision_id: &str,
        context: &Map<String, Value>,
    ) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct WorkflowRestClientImpl {
    client: reqwest::Client,
}

impl WorkflowRestClientImpl {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        url: url::Url,
        token: &ServiceToken,
        body: String,
    ) -> Result<(StatusCode, String)> {
        let res = self
            .client
            .request(method, url)
            .header(http::header::AUTHORIZATION, token.bearer())
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(WorkflowTriggerError::TransportError)?;
        let status = res.status();
        let text = res.text().await.map_err(WorkflowTriggerError::TransportError)?;
        Ok((status, text))
    }
}

#[async_trait]
impl WorkflowClient for WorkflowRestClientImpl {
    async fn start_instance(
        &self,
        config: &WorkflowServiceConfig,
        token: &ServiceToken,
        definition_id: &str,
        context: &Map<String, Value>,
    ) -> Result<WorkflowInstance> {
        let url = config.workflow_instances_url()?;
        let body = serde_json::to_string(&StartInstanceRequest {
            definition_id,
            context,
        })?;
        tracing::info!("Starting workflow with definition ID \"{}\"...", definition_id);
        let (status, text) = self
            .send_json(reqwest::Method::POST, url, token, body)
            .await?;
        if status != StatusCode::CREATED {
            tracing::debug!("workflow start response: {} {}", status, text);
            return Err(WorkflowTriggerError::WorkflowStartRejected {
                status: status.as_u16(),
                body: text,
            }
            .into());
        }
        Ok(serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!("unexpected workflow instance body: {:?}", e);
            WorkflowInstance::default()
        }))
    }

    async fn update_task(
        &self,
        config: &WorkflowServiceConfig,
        token: &ServiceToken,
        task_instance_id: &str,
        task_decision_id: &str,
        context: &Map<String, Value>,
    ) -> Result<()> {
        let url = config.task_instance_url(task_instance_id)?;
        let body = serde_json::to_string(&UpdateTaskRequest {
            decision: task_decision_id,
            context,
            status: TASK_COMPLETED_STATUS,
        })?;
        tracing::info!(
            "Updating workflow task with instance ID \"{}\"...",
            task_instance_id
        );
        let (status, text) = self
            .send_json(reqwest::Method::PATCH, url, token, body)
            .await?;
        if status != StatusCode::NO_CONTENT {
            tracing::debug!("workflow task response: {} {}", status, text);
            return Err(WorkflowTriggerError::WorkflowTaskUpdateRejected {
                status: status.as_u16(),
                body: text,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_request_body() {
        let context = json!({"capEntityKeyObject": {"id": "42"}, "amount": 100});
        let body = serde_json::to_value(StartInstanceRequest {
            definition_id: "orderApproval",
            context: context.as_object().unwrap(),
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "definitionId": "orderApproval",
                "context": {"capEntityKeyObject": {"id": "42"}, "amount": 100}
            })
        );
    }

    #[test]
    fn test_update_request_body() {
        let context = json!({"comment": "ok"});
        let body = serde_json::to_value(UpdateTaskRequest {
            decision: "approve",
            context: context.as_object().unwrap(),
            status: TASK_COMPLETED_STATUS,
        })
        .unwrap();
        assert_eq!(
            body,
            json!({"decision": "approve", "context": {"comment": "ok"}, "status": "COMPLETED"})
        );
    }

    #[test]
    fn test_instance_body_ignores_unknown_fields() {
        let instance: WorkflowInstance = serde_json::from_str(
            r#"{"id":"wf-1","definitionId":"orderApproval","status":"RUNNING","subject":"x"}"#,
        )
        .unwrap();
        assert_eq!(instance.id.as_deref(), Some("wf-1"));
        assert_eq!(instance.status.as_deref(), Some("RUNNING"));
    }
}
