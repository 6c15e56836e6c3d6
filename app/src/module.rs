use crate::app::metadata::{SchemaDocument, WorkflowMetadataTable};
use crate::app::trigger::hook::EntityHandlerRegistry;
use crate::app::trigger::{WorkflowDispatcher, WorkflowTriggerBinder};
use anyhow::Result;
use infra::infra::binding::WorkflowBindings;
use infra::infra::token::{TokenBroker, XsuaaIdentityBrokerImpl};
use infra::infra::workflow::WorkflowRestClientImpl;
use infra::infra::WorkflowTriggerConfig;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct AppConfigModule {
    pub trigger_config: Arc<WorkflowTriggerConfig>,
    /// None: the workflow service is unavailable and every trigger is skipped
    pub bindings: Option<Arc<WorkflowBindings>>,
}

impl AppConfigModule {
    pub fn new(trigger_config: WorkflowTriggerConfig, bindings: Option<WorkflowBindings>) -> Self {
        Self {
            trigger_config: Arc::new(trigger_config),
            bindings: bindings.map(Arc::new),
        }
    }

    pub fn new_by_env() -> Self {
        let trigger_config = infra::infra::load_workflow_trigger_config_from_env().unwrap_or_default();
        let bindings = WorkflowBindings::new_by_env(&trigger_config)
            .inspect_err(|e| tracing::error!("Failed to find the workflow service: {:?}", e))
            .ok();
        Self::new(trigger_config, bindings)
    }
}

#[derive(Clone)]
pub struct AppModule {
    pub config_module: Arc<AppConfigModule>,
    pub metadata_table: Arc<WorkflowMetadataTable>,
    pub dispatcher: Arc<WorkflowDispatcher>,
    pub binder: Arc<WorkflowTriggerBinder>,
}

impl AppModule {
    pub fn new(config_module: Arc<AppConfigModule>, schema: &SchemaDocument) -> Result<Self> {
        let metadata_table = Arc::new(WorkflowMetadataTable::from_schema(schema));
        let dispatcher = Arc::new(match &config_module.bindings {
            Some(bindings) => {
                let client = infra::infra::new_http_client(&config_module.trigger_config)?;
                let identity_broker =
                    XsuaaIdentityBrokerImpl::new(client.clone(), bindings.identity_broker.clone());
                WorkflowDispatcher::new(
                    bindings.clone(),
                    TokenBroker::new(Arc::new(identity_broker)),
                    Arc::new(WorkflowRestClientImpl::new(client)),
                )
            }
            None => WorkflowDispatcher::unavailable(),
        });
        let binder = Arc::new(WorkflowTriggerBinder::new(
            metadata_table.clone(),
            dispatcher.clone(),
        ));
        Ok(Self {
            config_module,
            metadata_table,
            dispatcher,
            binder,
        })
    }

    pub fn new_by_env(schema: &SchemaDocument) -> Result<Self> {
        Self::new(Arc::new(AppConfigModule::new_by_env()), schema)
    }

    /// Hook the triggers into the host service. Call once at startup.
    pub fn bind(&self, registry: &mut dyn EntityHandlerRegistry) -> usize {
        self.binder.bind(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::trigger::hook::{AfterWriteHandler, WriteOperation};

    #[derive(Default)]
    struct CountingRegistry(Vec<(String, WriteOperation)>);

    impl EntityHandlerRegistry for CountingRegistry {
        fn register_after(
            &mut self,
            entity: &str,
            operation: WriteOperation,
            _handler: Arc<dyn AfterWriteHandler>,
        ) {
            self.0.push((entity.to_string(), operation));
        }
    }

    #[test]
    fn test_module_without_bindings_still_binds() {
        let schema = SchemaDocument::parse(
            r#"{"definitions": {"Order": {
                "kind": "entity",
                "@workflow.start.definitionId": "orderApproval",
                "elements": {"id": {"key": true}, "amount": {}}
            }}}"#,
        )
        .unwrap();
        let module = AppModule::new(
            Arc::new(AppConfigModule::new(WorkflowTriggerConfig::default(), None)),
            &schema,
        )
        .unwrap();
        assert!(!module.dispatcher.has_bindings());

        let mut registry = CountingRegistry::default();
        assert_eq!(module.bind(&mut registry), 1);
        assert_eq!(registry.0, vec![("Order".to_string(), WriteOperation::Create)]);
    }
}
