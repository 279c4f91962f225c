use std::collections::BTreeMap;
use std::path::Path;

use clap::ValueEnum;
use lightwatch_graph::policy::PolicyResource;
use lightwatch_graph::{ResourceGraph, ResourceSpec};
use serde::Serialize;

use super::assemble;

#[derive(Debug, Serialize)]
pub struct Plan {
    pub stack: String,
    pub template: String,
    pub digest: String,
    pub steps: Vec<PlanStep>,
    /// Role logical id to `action on scope` lines.
    pub grants: BTreeMap<String, Vec<String>>,
    pub unwired_channels: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PlanStep {
    pub logical_id: String,
    pub path: String,
    pub kind: String,
    pub after: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlanFormat {
    Text,
    Json,
}

pub fn plan(config_path: &Path, template: &str, format: PlanFormat) -> anyhow::Result<()> {
    let (_, graph) = assemble(config_path, template)?;
    let plan = build_plan(&graph)?;

    match format {
        PlanFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        PlanFormat::Text => print_text(&plan),
    }
    Ok(())
}

pub fn build_plan(graph: &ResourceGraph) -> anyhow::Result<Plan> {
    let mut steps = Vec::new();
    for id in graph.creation_order()? {
        let Some(resource) = graph.get(&id) else {
            continue;
        };
        steps.push(PlanStep {
            logical_id: id.to_string(),
            path: resource.path.to_string(),
            kind: resource.kind().to_string(),
            after: resource.dependencies().into_iter().map(|d| d.to_string()).collect(),
        });
    }

    let mut grants = BTreeMap::new();
    for resource in graph.iter() {
        if let ResourceSpec::Role(role) = &resource.spec {
            let lines = role
                .grants()
                .into_iter()
                .map(|(action, scope)| {
                    let scope = match scope {
                        PolicyResource::Ref(attr) => attr.to_string(),
                        PolicyResource::Arn(arn) => arn.to_string(),
                    };
                    format!("{action} on {scope}")
                })
                .collect();
            grants.insert(resource.logical_id.to_string(), lines);
        }
    }

    Ok(Plan {
        stack: graph.stack.clone(),
        template: graph.template.clone(),
        digest: graph.digest()?,
        steps,
        grants,
        unwired_channels: graph.unwired_channels().into_iter().map(|id| id.to_string()).collect(),
    })
}

fn print_text(plan: &Plan) {
    println!("Stack {} / template {}", plan.stack, plan.template);
    println!("  Digest: {}", plan.digest);
    println!();
    println!("Creation order:");
    for (n, step) in plan.steps.iter().enumerate() {
        println!("  {:>2}. {} ({}) [{}]", n + 1, step.logical_id, step.kind, step.path);
        if !step.after.is_empty() {
            println!("      after: {}", step.after.join(", "));
        }
    }
    println!();
    println!("Grants:");
    for (role, lines) in &plan.grants {
        println!("  {role}");
        for line in lines {
            println!("    - {line}");
        }
    }
    if !plan.unwired_channels.is_empty() {
        println!();
        println!("⚠ Channels with no alert route: {}", plan.unwired_channels.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::commands::testutil;

    #[test]
    fn plan_lists_every_resource_after_its_dependencies() {
        let dir = TempDir::new().unwrap();
        let config = testutil::workspace(dir.path());
        let (_, graph) = assemble(&config, "home").unwrap();
        let plan = build_plan(&graph).unwrap();

        assert_eq!(plan.steps.len(), graph.len());
        let position = |id: &str| plan.steps.iter().position(|s| s.logical_id == id).unwrap();
        for (n, step) in plan.steps.iter().enumerate() {
            for dep in &step.after {
                assert!(position(dep) < n, "{} planned before {dep}", step.logical_id);
            }
        }
    }

    #[test]
    fn plan_reports_the_unrouted_failure_channel() {
        let dir = TempDir::new().unwrap();
        let config = testutil::workspace(dir.path());
        let (_, graph) = assemble(&config, "home").unwrap();
        let plan = build_plan(&graph).unwrap();

        assert_eq!(plan.unwired_channels.len(), 1);
        assert!(plan.unwired_channels[0].starts_with("DataCollectiondbFailNotifier"));
        assert!(plan.grants.values().flatten().all(|line| !line.contains('*')));
    }

    #[test]
    fn unknown_template_is_an_error() {
        let dir = TempDir::new().unwrap();
        let config = testutil::workspace(dir.path());
        let err = assemble(&config, "cabin").unwrap_err();
        assert!(format!("{err:#}").contains("cabin"));
    }

    #[test]
    fn json_plan_renders() {
        let dir = TempDir::new().unwrap();
        let config = testutil::workspace(dir.path());
        plan(&config, "home", PlanFormat::Json).unwrap();
    }
}
