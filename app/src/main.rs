use anyhow::Result;
use app::app::metadata::{SchemaDocument, WorkflowMetadataTable};
use app::module::AppConfigModule;
use clap::{arg, command, Parser};
use entity_workflow_base::error::WorkflowTriggerError;
use serde_json::{Map, Value};

/// Print the workflow descriptors resolved from a schema document.
#[derive(Parser, Debug)]
#[command(name = entity_workflow_base::APP_METADATA_CLI_NAME, author, version, about, long_about = None)]
struct Args {
    /// Compiled schema document (json)
    #[arg(long, short, required = true)]
    schema: String,

    /// Only print this entity
    #[arg(long, short)]
    entity: Option<String>,

    /// Skip entities that neither start workflows nor complete tasks
    #[arg(long, short, default_value = "false")]
    triggerable: bool,

    /// Also resolve the service bindings from VCAP_SERVICES
    #[arg(long, default_value = "false")]
    check_bindings: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let conf = entity_workflow_base::logging::load_tracing_config_from_env().unwrap_or_default();
    entity_workflow_base::logging::tracing_init(conf)?;

    let schema = SchemaDocument::parse(&std::fs::read_to_string(&args.schema)?)?;
    let table = WorkflowMetadataTable::from_schema(&schema);

    let entries: Vec<_> = if args.triggerable {
        table.triggerable().collect()
    } else {
        table.iter().collect()
    };
    let mut out = Map::new();
    for (name, metadata) in entries {
        if args.entity.as_ref().is_some_and(|e| e != name) {
            continue;
        }
        out.insert(name.clone(), serde_json::to_value(metadata.as_ref())?);
    }
    if let Some(entity) = &args.entity {
        if out.is_empty() {
            return Err(WorkflowTriggerError::InvalidParameter(format!(
                "entity not found in {}: {}",
                args.schema, entity
            ))
            .into());
        }
    }
    println!("{}", serde_json::to_string_pretty(&Value::Object(out))?);

    if args.check_bindings {
        let config_module = AppConfigModule::new_by_env();
        match &config_module.bindings {
            Some(bindings) => println!(
                "workflow service: {} (identity broker: {})",
                bindings.workflow.workflow_rest_url, bindings.identity_broker.credentials.url
            ),
            None => println!("workflow service: unavailable"),
        }
    }
    Ok(())
}
