//! Resource specifications: database, queue, topic, functions, and the
//! bootstrap custom resource.

use std::collections::BTreeMap;
use std::path::PathBuf;

use lightwatch_core::LogicalId;
use serde::{Deserialize, Serialize};

use crate::graph::AttrRef;
use crate::network::SubnetSelection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseEngine {
    Postgres,
}

/// Single-instance relational database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedDatabase {
    pub engine: DatabaseEngine,
    /// `None` lets the provider pick its current default.
    pub engine_version: Option<String>,
    pub instance_class: String,
    pub multi_az: bool,
    pub allow_major_version_upgrade: bool,
    pub backup_retention_days: u32,
    pub allocated_storage_gib: u32,
    /// Storage autoscaling ceiling.
    pub max_allocated_storage_gib: u32,
    pub port: u16,
    pub publicly_accessible: bool,
    pub placement: SubnetSelection,
    pub boundaries: Vec<AttrRef>,
    /// Secret the master credentials are read from.
    pub credentials: AttrRef,
}

/// Durable at-least-once queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub retention_secs: u32,
    /// Must cover the consumer's timeout or in-flight messages reappear
    /// while still being processed.
    pub visibility_timeout_secs: u32,
}

impl Default for Queue {
    fn default() -> Self {
        Self {
            retention_secs: 4 * 24 * 60 * 60,
            visibility_timeout_secs: 30,
        }
    }
}

/// Pub/sub topic for operational alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    Arm64,
    X86_64,
}

/// Value bound to a function environment variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvValue {
    Literal(String),
    Ref(AttrRef),
}

/// What a compute unit is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitRole {
    /// Consumes the queue and writes rows.
    Writer,
    /// Creates the schema once, then goes dormant.
    Initializer,
}

/// A container-image function with its network placement and identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeUnit {
    pub unit: UnitRole,
    pub description: String,
    pub module: String,
    /// Build context resolved from the module name.
    pub build_path: PathBuf,
    pub architecture: Architecture,
    pub memory_mb: u32,
    pub timeout_secs: u32,
    pub environment: BTreeMap<String, EnvValue>,
    pub placement: SubnetSelection,
    pub boundaries: Vec<AttrRef>,
    pub execution_role: AttrRef,
}

impl ComputeUnit {
    pub fn env_refs(&self) -> impl Iterator<Item = (&str, &AttrRef)> {
        self.environment.iter().filter_map(|(k, v)| match v {
            EnvValue::Ref(attr) => Some((k.as_str(), attr)),
            EnvValue::Literal(_) => None,
        })
    }
}

/// Queue → function trigger. One delivery, one invocation; no dead-letter
/// redirect, so a poison message keeps coming back until it expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBinding {
    pub queue: AttrRef,
    pub function: AttrRef,
    pub batch_size: u32,
    pub enabled: bool,
}

/// Custom-resource provider that runs the bootstrap handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapProvider {
    /// Function the handler invokes.
    pub target: AttrRef,
    pub role: AttrRef,
    pub log_retention_days: u32,
    /// Upper bound on one synchronous invocation.
    pub timeout_secs: u64,
}

/// The invocation record: a custom resource whose creation runs the
/// initializer exactly once for its physical id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapResource {
    pub service_token: AttrRef,
    pub physical_resource_id: String,
}

/// Opt-in route from a failure source to the alert channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRoute {
    pub source: LogicalId,
    pub channel: LogicalId,
}
