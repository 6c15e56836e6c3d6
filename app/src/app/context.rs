use super::metadata::EntityWorkflowMetadata;
use entity_workflow_base::CAP_ENTITY_KEY_NAME;
use serde_json::{Map, Value};

/// Payload sent when a workflow instance is started.
pub type StartContext = Map<String, Value>;
/// Payload sent when a workflow task is completed.
pub type TaskContext = Map<String, Value>;

// fields missing from the record are left out (an explicit null is copied)
fn pick(names: &[String], record: &Map<String, Value>) -> Map<String, Value> {
    names
        .iter()
        .filter_map(|name| record.get(name).map(|v| (name.clone(), v.clone())))
        .collect()
}

/// Key object under `capEntityKeyObject`, then the start properties:
/// nested under the data object name in legacy mode, flattened otherwise.
pub fn build_start_context(
    metadata: &EntityWorkflowMetadata,
    record: &Map<String, Value>,
) -> StartContext {
    let mut context = StartContext::new();
    context.insert(
        CAP_ENTITY_KEY_NAME.to_string(),
        Value::Object(pick(&metadata.key_property_names, record)),
    );
    let start_data = pick(&metadata.start_property_names, record);
    match &metadata.start_data_object_name {
        Some(name) => {
            context.insert(name.clone(), Value::Object(start_data));
        }
        None => context.extend(start_data),
    }
    context
}

/// Always empty in legacy mode, whatever `task_enabled` says.
pub fn build_task_context(
    metadata: &EntityWorkflowMetadata,
    record: &Map<String, Value>,
) -> TaskContext {
    if metadata.is_legacy_mode() {
        return TaskContext::new();
    }
    pick(&metadata.task_property_names, record)
}
