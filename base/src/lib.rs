pub mod error;
pub mod logging;

pub static APP_NAME: &str = "entity-workflow";
pub static APP_METADATA_CLI_NAME: &str = "workflow-metadata";

/// Key under which the entity keys are nested in every start context.
pub static CAP_ENTITY_KEY_NAME: &str = "capEntityKeyObject";

/// Request headers carried by an update that completes a workflow task.
pub static TASK_INSTANCE_ID_HEADER: &str = "x-taskInstanceId";
pub static TASK_DECISION_ID_HEADER: &str = "x-taskDecisionId";
