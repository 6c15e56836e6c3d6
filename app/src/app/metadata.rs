//! Workflow descriptors resolved from schema annotations.
//!
//! The schema is read once: every entity definition is turned into an
//! immutable `EntityWorkflowMetadata` and kept in a `WorkflowMetadataTable`
//! keyed by entity name. Malformed annotations are reported here, at load
//! time, and resolve to "absent".

use anyhow::Result;
use entity_workflow_base::error::WorkflowTriggerError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const DEFINITION_ID_ANNOTATION: &str = "@workflow.start.definitionId";
pub const START_DATA_OBJECT_ANNOTATION: &str = "@workflow.start.dataObject";
pub const START_PROPERTY_ANNOTATION: &str = "@workflow.start.property";
pub const HIDDEN_ANNOTATION: &str = "@UI.Hidden";
pub const TASK_ENABLED_ASPECT: &str = "sap.workflow.TaskEnabled";
pub const ENTITY_KIND: &str = "entity";

/// Parsed schema document (`definitions` keyed by qualified name).
#[derive(Deserialize, Clone, Debug, Default)]
pub struct SchemaDocument {
    #[serde(default)]
    pub definitions: IndexMap<String, EntityDefinition>,
}

impl SchemaDocument {
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| WorkflowTriggerError::ParseError(format!("cannot parse schema: {e:?}")).into())
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct EntityDefinition {
    pub kind: Option<String>,
    #[serde(default)]
    pub elements: IndexMap<String, ElementDefinition>,
    #[serde(default)]
    pub includes: Vec<String>,
    /// every other entry; annotations are the ones starting with `@`
    #[serde(flatten)]
    pub annotations: IndexMap<String, Value>,
}

impl EntityDefinition {
    pub fn is_entity(&self) -> bool {
        self.kind.as_deref() == Some(ENTITY_KIND)
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct ElementDefinition {
    #[serde(default)]
    pub key: bool,
    #[serde(flatten)]
    pub annotations: IndexMap<String, Value>,
}

impl ElementDefinition {
    pub fn is_hidden(&self) -> bool {
        is_truthy(self.annotations.get(HIDDEN_ANNOTATION))
    }
    pub fn is_start_property(&self) -> bool {
        is_truthy(self.annotations.get(START_PROPERTY_ANNOTATION))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum AnnotatedValue {
    Absent,
    Text(String),
    Malformed(Value),
}

// path form `{"=": "path"}` wins over the literal
fn annotated_value(annotations: &IndexMap<String, Value>, name: &str) -> AnnotatedValue {
    match annotations.get(name) {
        None | Some(Value::Null) => AnnotatedValue::Absent,
        Some(Value::String(s)) if s.is_empty() => AnnotatedValue::Absent,
        Some(Value::String(s)) => AnnotatedValue::Text(s.clone()),
        Some(Value::Object(o)) => match o.get("=") {
            Some(Value::String(path)) if !path.is_empty() => AnnotatedValue::Text(path.clone()),
            _ => AnnotatedValue::Malformed(Value::Object(o.clone())),
        },
        Some(Value::Bool(false)) => AnnotatedValue::Absent,
        Some(other) => AnnotatedValue::Malformed(other.clone()),
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Workflow descriptor of one entity type.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntityWorkflowMetadata {
    /// empty: the entity does not start workflows
    pub definition_id: String,
    pub key_property_names: Vec<String>,
    /// set: legacy wrapper mode
    pub start_data_object_name: Option<String>,
    pub start_property_names: Vec<String>,
    pub task_property_names: Vec<String>,
    pub task_enabled: bool,
}

impl EntityWorkflowMetadata {
    pub fn resolve(definition: &EntityDefinition) -> Self {
        let definition_id = text_or_warn(definition, DEFINITION_ID_ANNOTATION).unwrap_or_default();
        let start_data_object_name = text_or_warn(definition, START_DATA_OBJECT_ANNOTATION);

        let visible = || {
            definition
                .elements
                .iter()
                .filter(|(_, element)| !element.is_hidden())
        };
        let key_property_names = visible()
            .filter(|(_, element)| element.key)
            .map(|(name, _)| name.clone())
            .collect();
        let task_property_names: Vec<String> = visible()
            .filter(|(_, element)| !element.key)
            .map(|(name, _)| name.clone())
            .collect();
        let start_property_names = if start_data_object_name.is_some() {
            visible()
                .filter(|(_, element)| element.is_start_property())
                .map(|(name, _)| name.clone())
                .collect()
        } else {
            task_property_names.clone()
        };
        let task_enabled = definition
            .includes
            .iter()
            .any(|include| include == TASK_ENABLED_ASPECT);

        let metadata = Self {
            definition_id,
            key_property_names,
            start_data_object_name,
            start_property_names,
            task_property_names,
            task_enabled,
        };
        if metadata.is_legacy_mode() && !metadata.is_workflow_entity() {
            tracing::warn!(
                "{} is set without {}: no workflow will be started",
                START_DATA_OBJECT_ANNOTATION,
                DEFINITION_ID_ANNOTATION
            );
        }
        if metadata.is_legacy_mode() && metadata.task_enabled {
            tracing::warn!(
                "{} includes {} in legacy data object mode: task context stays empty",
                START_DATA_OBJECT_ANNOTATION,
                TASK_ENABLED_ASPECT
            );
        }
        metadata
    }

    pub fn is_workflow_entity(&self) -> bool {
        !self.definition_id.is_empty()
    }
    pub fn is_legacy_mode(&self) -> bool {
        self.start_data_object_name.is_some()
    }
    /// neither starts workflows nor completes tasks
    pub fn is_noop(&self) -> bool {
        !self.is_workflow_entity() && !self.task_enabled
    }
}

fn text_or_warn(definition: &EntityDefinition, annotation: &str) -> Option<String> {
    match annotated_value(&definition.annotations, annotation) {
        AnnotatedValue::Text(s) => Some(s),
        AnnotatedValue::Absent => None,
        AnnotatedValue::Malformed(v) => {
            tracing::warn!("ignore malformed annotation {}: {}", annotation, v);
            None
        }
    }
}

/// Descriptors of every entity of a schema, built once and read-only after.
#[derive(Clone, Debug, Default)]
pub struct WorkflowMetadataTable {
    entities: IndexMap<String, Arc<EntityWorkflowMetadata>>,
}

impl WorkflowMetadataTable {
    pub fn from_schema(schema: &SchemaDocument) -> Self {
        let entities = schema
            .definitions
            .iter()
            .filter(|(_, definition)| definition.is_entity())
            .map(|(name, definition)| {
                let _span = tracing::debug_span!("resolve_workflow_metadata", entity = %name).entered();
                let metadata = EntityWorkflowMetadata::resolve(definition);
                tracing::debug!("resolved: {:?}", metadata);
                (name.clone(), Arc::new(metadata))
            })
            .collect();
        Self { entities }
    }

    pub fn get(&self, entity: &str) -> Option<&Arc<EntityWorkflowMetadata>> {
        self.entities.get(entity)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<EntityWorkflowMetadata>)> {
        self.entities.iter()
    }

    /// entities that start workflows or complete tasks
    pub fn triggerable(&self) -> impl Iterator<Item = (&String, &Arc<EntityWorkflowMetadata>)> {
        self.entities.iter().filter(|(_, m)| !m.is_noop())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
