//! Service binding resolution.
//!
//! Bindings come from the platform's `VCAP_SERVICES` document: a map from
//! service label to the list of bound instances, each with `name`, `label`,
//! `tags` and opaque `credentials`. The workflow service is looked up by
//! label and the identity broker by tag, once at start up.

use super::WorkflowTriggerConfig;
use anyhow::Result;
use debug_stub_derive::DebugStub;
use entity_workflow_base::error::WorkflowTriggerError;
use serde::Deserialize;
use std::collections::BTreeMap;
use url::Url;

pub const VCAP_SERVICES_ENV: &str = "VCAP_SERVICES";

#[derive(Deserialize, Clone, Debug, Default)]
pub struct ServiceBinding {
    pub name: Option<String>,
    pub label: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub credentials: serde_json::Value,
}

#[derive(Clone, Debug, Default)]
pub struct ServiceBindings {
    bindings: Vec<ServiceBinding>,
}

impl ServiceBindings {
    pub fn parse(vcap_services: &str) -> Result<Self> {
        let by_label: BTreeMap<String, Vec<ServiceBinding>> = serde_json::from_str(vcap_services)
            .map_err(|e| {
            WorkflowTriggerError::ParseError(format!("cannot parse {VCAP_SERVICES_ENV}: {e:?}"))
        })?;
        let bindings = by_label
            .into_iter()
            .flat_map(|(label, instances)| {
                instances.into_iter().map(move |mut b| {
                    if b.label.is_none() {
                        b.label = Some(label.clone());
                    }
                    b
                })
            })
            .collect();
        Ok(Self { bindings })
    }

    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(VCAP_SERVICES_ENV).map_err(|_| {
            WorkflowTriggerError::ConfigUnavailable(format!("{VCAP_SERVICES_ENV} is not set"))
        })?;
        Self::parse(&raw)
    }

    pub fn find_by_label(&self, label: &str) -> Option<&ServiceBinding> {
        self.bindings
            .iter()
            .find(|b| b.label.as_deref() == Some(label))
    }

    pub fn find_by_tag(&self, tag: &str) -> Option<&ServiceBinding> {
        self.bindings
            .iter()
            .find(|b| b.tags.iter().any(|t| t == tag))
    }
}

/// OAuth client credentials of a binding.
#[derive(Deserialize, Clone, DebugStub, PartialEq)]
pub struct OAuthCredentials {
    pub url: String,
    pub clientid: String,
    #[debug_stub = "******"]
    pub clientsecret: String,
    pub verificationkey: Option<String>,
    pub identityzone: Option<String>,
    pub xsappname: Option<String>,
}

impl OAuthCredentials {
    pub fn token_url(&self) -> Result<Url> {
        join_segments(&self.url, &["oauth", "token"])
    }
    pub fn token_keys_url(&self) -> Result<Url> {
        join_segments(&self.url, &["token_keys"])
    }
}

#[derive(Deserialize, Clone, Debug)]
struct WorkflowEndpoints {
    workflow_rest_url: String,
}

#[derive(Deserialize, Clone, Debug)]
struct WorkflowCredentials {
    endpoints: WorkflowEndpoints,
    uaa: OAuthCredentials,
}

/// Workflow engine endpoint and the identity binding its tokens are scoped to.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkflowServiceConfig {
    pub workflow_rest_url: Url,
    pub uaa: OAuthCredentials,
}

impl WorkflowServiceConfig {
    pub fn new(workflow_rest_url: &str, uaa: OAuthCredentials) -> Result<Self> {
        let workflow_rest_url = Url::parse(workflow_rest_url).map_err(|e| {
            WorkflowTriggerError::ParseError(format!(
                "cannot parse workflow_rest_url: {workflow_rest_url}, error= {e:?}"
            ))
        })?;
        Ok(Self {
            workflow_rest_url,
            uaa,
        })
    }

    fn from_binding(binding: &ServiceBinding) -> Result<Self> {
        let credentials: WorkflowCredentials =
            serde_json::from_value(binding.credentials.clone()).map_err(|e| {
                WorkflowTriggerError::ConfigUnavailable(format!(
                    "workflow binding {:?} has unusable credentials: {e:?}",
                    binding.name
                ))
            })?;
        Self::new(&credentials.endpoints.workflow_rest_url, credentials.uaa)
    }

    pub fn workflow_instances_url(&self) -> Result<Url> {
        join_segments(
            self.workflow_rest_url.as_str(),
            &["v1", "workflow-instances"],
        )
    }

    pub fn task_instance_url(&self, task_instance_id: &str) -> Result<Url> {
        join_segments(
            self.workflow_rest_url.as_str(),
            &["v1", "task-instances", task_instance_id],
        )
    }
}

/// Platform auth broker used to establish the caller's security context.
#[derive(Clone, Debug, PartialEq)]
pub struct IdentityBrokerConfig {
    pub credentials: OAuthCredentials,
}

impl IdentityBrokerConfig {
    fn from_binding(binding: &ServiceBinding) -> Result<Self> {
        let credentials = serde_json::from_value(binding.credentials.clone()).map_err(|e| {
            WorkflowTriggerError::ConfigUnavailable(format!(
                "identity broker binding {:?} has unusable credentials: {e:?}",
                binding.name
            ))
        })?;
        Ok(Self { credentials })
    }
}

/// Everything the trigger needs from the environment, resolved once.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkflowBindings {
    pub workflow: WorkflowServiceConfig,
    pub identity_broker: IdentityBrokerConfig,
}

impl WorkflowBindings {
    pub fn resolve(bindings: &ServiceBindings, config: &WorkflowTriggerConfig) -> Result<Self> {
        let workflow = bindings
            .find_by_label(&config.service_label)
            .ok_or_else(|| {
                WorkflowTriggerError::ConfigUnavailable(format!(
                    "no service matches label {}",
                    config.service_label
                ))
            })
            .and_then(|b| WorkflowServiceConfig::from_binding(b).map_err(into_config_unavailable))?;
        let identity_broker = bindings
            .find_by_tag(&config.identity_broker_tag)
            .ok_or_else(|| {
                WorkflowTriggerError::ConfigUnavailable(format!(
                    "no service matches tag {}",
                    config.identity_broker_tag
                ))
            })
            .and_then(|b| IdentityBrokerConfig::from_binding(b).map_err(into_config_unavailable))?;
        Ok(Self {
            workflow,
            identity_broker,
        })
    }

    pub fn new_by_env(config: &WorkflowTriggerConfig) -> Result<Self> {
        Self::resolve(&ServiceBindings::from_env()?, config)
    }
}

fn into_config_unavailable(e: anyhow::Error) -> WorkflowTriggerError {
    match e.downcast::<WorkflowTriggerError>() {
        Ok(WorkflowTriggerError::ConfigUnavailable(m)) => WorkflowTriggerError::ConfigUnavailable(m),
        Ok(other) => WorkflowTriggerError::ConfigUnavailable(other.to_string()),
        Err(e) => WorkflowTriggerError::ConfigUnavailable(format!("{e:?}")),
    }
}

// keeps any path prefix of the base url (e.g. ".../workflow-service/rest")
fn join_segments(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base).map_err(|e| {
        WorkflowTriggerError::ParseError(format!("cannot parse url from: {base}, error= {e:?}"))
    })?;
    url.path_segments_mut()
        .map_err(|_| WorkflowTriggerError::ParseError(format!("cannot-be-a-base url: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
