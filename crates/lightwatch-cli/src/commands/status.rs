use std::path::Path;

use lightwatch_core::LightwatchConfig;
use lightwatch_state::{BootstrapRecord, DeploymentRecord};

use super::{open_state, state_path};

pub fn status(config_path: &Path, data_dir: &Path, template: Option<&str>) -> anyhow::Result<()> {
    if !state_path(data_dir).exists() {
        println!("No deployments recorded in {}", data_dir.display());
        return Ok(());
    }
    let store = open_state(data_dir)?;

    let deployments = match template {
        Some(template) => {
            let config = LightwatchConfig::from_file(config_path)?;
            config.template(template)?;
            store
                .get_deployment(&config.stack.name, template)?
                .into_iter()
                .collect()
        }
        None => store.list_deployments()?,
    };
    let bootstraps = store.list_bootstraps()?;

    if deployments.is_empty() {
        println!("No deployments recorded.");
    }
    for deployment in &deployments {
        print_deployment(deployment);
    }
    println!();
    println!("Bootstraps:");
    if bootstraps.is_empty() {
        println!("  (none)");
    }
    for record in &bootstraps {
        print_bootstrap(record);
    }
    Ok(())
}

fn print_deployment(deployment: &DeploymentRecord) {
    println!("{}/{}", deployment.stack, deployment.template);
    println!("  Digest:    {}", deployment.graph_digest);
    println!("  Resources: {}", deployment.creation_order.len());
    for id in &deployment.creation_order {
        let Some(attrs) = deployment.outputs.get(id) else {
            continue;
        };
        let primary = attrs
            .get("arn")
            .or_else(|| attrs.get("id"))
            .map(String::as_str)
            .unwrap_or("-");
        println!("    {id}  {primary}");
    }
}

fn print_bootstrap(record: &BootstrapRecord) {
    println!(
        "  {} `{}`: {} (attempts: {})",
        record.stack, record.identity, record.phase, record.attempts
    );
    if let Some(err) = &record.last_error {
        println!("    last error: {err}");
    }
}
