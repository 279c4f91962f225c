//! Dry-run a deployment: provision against the in-memory engine, persist
//! the outputs, then deliver the bootstrap handler's create event.

use std::path::Path;
use std::time::Duration;

use lightwatch_bootstrap::{
    BootstrapOrchestrator, BootstrapSettings, LifecycleEvent, LifecycleResponse, RecordingInvoker, Scripted,
};
use lightwatch_graph::{InMemoryEngine, Provisioner};
use lightwatch_state::{DeploymentRecord, StateStore};
use tracing::info;

use super::{assemble, open_state, unix_now};

#[derive(Debug)]
pub struct SimulationReport {
    pub stack: String,
    pub template: String,
    pub graph_digest: String,
    pub created: usize,
    /// Absent when the graph carries no bootstrap resource.
    pub bootstrap: Option<LifecycleResponse>,
    pub invocations: usize,
}

pub async fn simulate(
    config_path: &Path,
    data_dir: &Path,
    template: &str,
    fail_bootstrap: Option<&str>,
) -> anyhow::Result<()> {
    let store = open_state(data_dir)?;
    let report = run(config_path, &store, template, fail_bootstrap).await?;

    println!("✓ Provisioned {} resources for {}/{}", report.created, report.stack, report.template);
    println!("  Digest: {}", report.graph_digest);
    match &report.bootstrap {
        None => println!("  Bootstrap: none"),
        Some(response) if response.is_success() && report.invocations == 0 => {
            println!("  Bootstrap: `{}` already ran; initializer dormant", response.physical_resource_id);
        }
        Some(response) if response.is_success() => {
            println!("  Bootstrap: initializer invoked for `{}`", response.physical_resource_id);
        }
        Some(response) => {
            let reason = response.reason.as_deref().unwrap_or("unknown");
            anyhow::bail!("bootstrap failed: {reason}");
        }
    }
    Ok(())
}

/// Provision `template`, record the deployment in `store`, and run the
/// bootstrap create event.
pub async fn run(
    config_path: &Path,
    store: &StateStore,
    template: &str,
    fail_bootstrap: Option<&str>,
) -> anyhow::Result<SimulationReport> {
    let (_, graph) = assemble(config_path, template)?;
    let mut provisioner = Provisioner::new(InMemoryEngine::new());
    let provisioned = provisioner.provision(&graph)?;

    store.put_deployment(&DeploymentRecord {
        stack: provisioned.stack.clone(),
        template: provisioned.template.clone(),
        graph_digest: provisioned.graph_digest.clone(),
        outputs: provisioned.output_table(),
        creation_order: provisioned.creation_order.iter().map(ToString::to_string).collect(),
        created_at: unix_now(),
    })?;
    info!(stack = %provisioned.stack, template, "deployment recorded");

    let mut report = SimulationReport {
        stack: provisioned.stack.clone(),
        template: provisioned.template.clone(),
        graph_digest: provisioned.graph_digest.clone(),
        created: provisioned.outputs.len(),
        bootstrap: None,
        invocations: 0,
    };
    let Some(target) = provisioned.bootstrap else {
        return Ok(report);
    };

    let invoker = match fail_bootstrap {
        Some(message) => RecordingInvoker::scripted([Scripted::Fail(message.to_string())]),
        None => RecordingInvoker::new(),
    };
    let orchestrator = BootstrapOrchestrator::new(
        store.clone(),
        invoker.clone(),
        BootstrapSettings {
            stack: provisioned.stack.clone(),
            identity: target.identity,
            function_name: target.function_name,
            timeout: Duration::from_secs(target.timeout_secs),
        },
    );
    let request_id = format!("simulate-{}", unix_now());
    let event = LifecycleEvent::create(&provisioned.stack, target.logical_id.as_str(), &request_id);

    report.bootstrap = Some(orchestrator.handle(&event).await);
    report.invocations = invoker.count().await;
    Ok(report)
}
