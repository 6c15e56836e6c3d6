pub mod hook;
pub mod outcome;

use self::hook::{AfterWriteHandler, EntityHandlerRegistry, WriteOperation, WriteRequest};
use self::outcome::{DispatchOutcome, SkipReason};
use super::context::{build_start_context, build_task_context};
use super::metadata::{EntityWorkflowMetadata, WorkflowMetadataTable};
use anyhow::Result;
use entity_workflow_base::{TASK_DECISION_ID_HEADER, TASK_INSTANCE_ID_HEADER};
use infra::infra::binding::WorkflowBindings;
use infra::infra::token::TokenBroker;
use infra::infra::workflow::WorkflowClient;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Clone)]
struct DispatchTarget {
    bindings: Arc<WorkflowBindings>,
    token_broker: TokenBroker,
    workflow_client: Arc<dyn WorkflowClient>,
}

/// Runs one start or task update against the workflow engine.
///
/// Never fails: every error becomes a logged `DispatchOutcome`.
#[derive(Clone)]
pub struct WorkflowDispatcher {
    // None when the service bindings could not be resolved at startup
    target: Option<DispatchTarget>,
}

impl WorkflowDispatcher {
    pub fn new(
        bindings: Arc<WorkflowBindings>,
        token_broker: TokenBroker,
        workflow_client: Arc<dyn WorkflowClient>,
    ) -> Self {
        Self {
            target: Some(DispatchTarget {
                bindings,
                token_broker,
                workflow_client,
            }),
        }
    }

    /// Every dispatch is skipped with `ConfigUnavailable`.
    pub fn unavailable() -> Self {
        Self { target: None }
    }

    pub fn has_bindings(&self) -> bool {
        self.target.is_some()
    }

    pub async fn dispatch_start(
        &self,
        metadata: &EntityWorkflowMetadata,
        record: &Map<String, Value>,
        authorization: Option<&str>,
    ) -> DispatchOutcome {
        if !metadata.is_workflow_entity() {
            return DispatchOutcome::Skipped(SkipReason::NotWorkflowEntity);
        }
        self.try_start(metadata, record, authorization)
            .await
            .unwrap_or_else(|e| DispatchOutcome::from_error(&e))
    }

    async fn try_start(
        &self,
        metadata: &EntityWorkflowMetadata,
        record: &Map<String, Value>,
        authorization: Option<&str>,
    ) -> Result<DispatchOutcome> {
        let Some(target) = &self.target else {
            return Ok(DispatchOutcome::Skipped(SkipReason::ConfigUnavailable));
        };
        let workflow = &target.bindings.workflow;
        let context = build_start_context(metadata, record);
        let token = target.token_broker.exchange(workflow, authorization).await?;
        let instance = target
            .workflow_client
            .start_instance(workflow, &token, &metadata.definition_id, &context)
            .await?;
        Ok(DispatchOutcome::Started {
            instance_id: instance.id,
        })
    }

    /// Empty header values count as missing.
    pub async fn dispatch_task_update(
        &self,
        metadata: &EntityWorkflowMetadata,
        record: &Map<String, Value>,
        authorization: Option<&str>,
        task_instance_id: Option<&str>,
        task_decision_id: Option<&str>,
    ) -> DispatchOutcome {
        if !metadata.task_enabled {
            return DispatchOutcome::Skipped(SkipReason::NotTaskEnabled);
        }
        let (Some(task_instance_id), Some(task_decision_id)) = (
            task_instance_id.filter(|s| !s.is_empty()),
            task_decision_id.filter(|s| !s.is_empty()),
        ) else {
            return DispatchOutcome::Skipped(SkipReason::MissingTaskHeaders);
        };
        self.try_task_update(
            metadata,
            record,
            authorization,
            task_instance_id,
            task_decision_id,
        )
        .await
        .unwrap_or_else(|e| DispatchOutcome::from_error(&e))
    }

    async fn try_task_update(
        &self,
        metadata: &EntityWorkflowMetadata,
        record: &Map<String, Value>,
        authorization: Option<&str>,
        task_instance_id: &str,
        task_decision_id: &str,
    ) -> Result<DispatchOutcome> {
        let Some(target) = &self.target else {
            return Ok(DispatchOutcome::Skipped(SkipReason::ConfigUnavailable));
        };
        let workflow = &target.bindings.workflow;
        let context = build_task_context(metadata, record);
        let token = target.token_broker.exchange(workflow, authorization).await?;
        target
            .workflow_client
            .update_task(
                workflow,
                &token,
                task_instance_id,
                task_decision_id,
                &context,
            )
            .await?;
        Ok(DispatchOutcome::TaskCompleted {
            task_instance_id: task_instance_id.to_string(),
        })
    }
}

// captures what the dispatch needs from the request, then defers it to commit
struct EntityTriggerHandler {
    entity: Arc<str>,
    operation: WriteOperation,
    metadata: Arc<EntityWorkflowMetadata>,
    dispatcher: Arc<WorkflowDispatcher>,
}

impl AfterWriteHandler for EntityTriggerHandler {
    fn after_write(&self, record: &Map<String, Value>, request: &dyn WriteRequest) {
        let entity = self.entity.clone();
        let operation = self.operation;
        let metadata = self.metadata.clone();
        let dispatcher = self.dispatcher.clone();
        let record = record.clone();
        let authorization = request.header(http::header::AUTHORIZATION.as_str());
        let task_instance_id = request.header(TASK_INSTANCE_ID_HEADER);
        let task_decision_id = request.header(TASK_DECISION_ID_HEADER);

        request.on_committed(Box::pin(async move {
            let outcome = match operation {
                WriteOperation::Create => {
                    dispatcher
                        .dispatch_start(&metadata, &record, authorization.as_deref())
                        .await
                }
                WriteOperation::Update => {
                    dispatcher
                        .dispatch_task_update(
                            &metadata,
                            &record,
                            authorization.as_deref(),
                            task_instance_id.as_deref(),
                            task_decision_id.as_deref(),
                        )
                        .await
                }
            };
            outcome.log(&entity);
        }));
    }
}

/// Registers post-commit workflow handlers for every triggerable entity.
pub struct WorkflowTriggerBinder {
    metadata_table: Arc<WorkflowMetadataTable>,
    dispatcher: Arc<WorkflowDispatcher>,
}

impl WorkflowTriggerBinder {
    pub fn new(metadata_table: Arc<WorkflowMetadataTable>, dispatcher: Arc<WorkflowDispatcher>) -> Self {
        Self {
            metadata_table,
            dispatcher,
        }
    }

    /// Create handlers go to workflow entities, update handlers to task
    /// enabled ones. Returns the number of handlers registered.
    pub fn bind(&self, registry: &mut dyn EntityHandlerRegistry) -> usize {
        let mut registered = 0;
        for (entity, metadata) in self.metadata_table.triggerable() {
            let operations = [
                (WriteOperation::Create, metadata.is_workflow_entity()),
                (WriteOperation::Update, metadata.task_enabled),
            ];
            for (operation, enabled) in operations {
                if !enabled {
                    continue;
                }
                let handler = EntityTriggerHandler {
                    entity: Arc::from(entity.as_str()),
                    operation,
                    metadata: metadata.clone(),
                    dispatcher: self.dispatcher.clone(),
                };
                registry.register_after(entity, operation, Arc::new(handler));
                registered += 1;
            }
        }
        tracing::info!("bound {} workflow trigger handler(s)", registered);
        registered
    }
}
