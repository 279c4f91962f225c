//! Graph error types.

use lightwatch_core::{ConfigError, LogicalId, ModuleError};
use thiserror::Error;

use crate::credentials::CredentialError;
use crate::graph::{Attribute, ResourceKind};

/// Errors raised by the provisioning collaborator.
#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("quota exceeded for {0}")]
    QuotaExceeded(ResourceKind),

    #[error("name conflict: {0}")]
    NameConflict(String),

    #[error("{logical_id}: {reason}")]
    Rejected { logical_id: LogicalId, reason: String },
}

/// Errors that can occur while assembling, validating, or provisioning a graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("module error: {0}")]
    Module(#[from] ModuleError),

    #[error("template `{0}` names no writer module; data collection is disabled")]
    DataCollectionDisabled(String),

    #[error("duplicate resource: {0}")]
    DuplicateResource(LogicalId),

    #[error("{from} references missing resource {target} ({attribute})")]
    DanglingReference {
        from: LogicalId,
        target: LogicalId,
        attribute: Attribute,
    },

    #[error("{from} references {attribute} of {target}, which a {kind} does not expose")]
    UnsupportedAttribute {
        from: LogicalId,
        target: LogicalId,
        kind: ResourceKind,
        attribute: Attribute,
    },

    #[error("dependency cycle through: {}", .0.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", "))]
    Cycle(Vec<LogicalId>),

    #[error("role {role} grants wildcard scope on {resource}")]
    WildcardScope { role: LogicalId, resource: String },

    #[error("function {function} binds secret material in `{variable}`; use the parameter pointer")]
    EmbeddedSecret { function: LogicalId, variable: String },

    #[error("expected exactly {expected} {kind}, found {found}")]
    Cardinality {
        kind: ResourceKind,
        expected: usize,
        found: usize,
    },

    #[error("role {role} is attached to {count} owners; roles are owned 1:1")]
    SharedRole { role: LogicalId, count: usize },

    #[error("invalid network: {0}")]
    Network(String),

    #[error("invalid placement for {resource}: {reason}")]
    Placement { resource: LogicalId, reason: String },

    #[error("boundary {boundary} on {resource} allows unscoped egress")]
    OpenEgress {
        resource: LogicalId,
        boundary: LogicalId,
    },

    #[error("invalid resource {resource}: {reason}")]
    InvalidResource { resource: LogicalId, reason: String },

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("provisioning failed: {0}")]
    Engine(#[from] EngineError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("engine did not report {attribute} for {logical_id}")]
    MissingOutput {
        logical_id: LogicalId,
        attribute: Attribute,
    },
}

pub type GraphResult<T> = Result<T, GraphError>;
