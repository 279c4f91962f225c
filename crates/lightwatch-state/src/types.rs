//! Domain types for the lightwatch state store.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Bootstrap ──────────────────────────────────────────────────────

/// Where a bootstrap identity is in its one-shot lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPhase {
    /// Never run, or the last attempt failed.
    Unbootstrapped,
    /// A handler holds the claim and is invoking the initializer.
    Invoking,
    /// The initializer returned successfully. Terminal for this identity.
    Bootstrapped,
}

impl fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BootstrapPhase::Unbootstrapped => "unbootstrapped",
            BootstrapPhase::Invoking => "invoking",
            BootstrapPhase::Bootstrapped => "bootstrapped",
        };
        f.write_str(s)
    }
}

/// Durable marker that the initializer has (or has not) run for an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapRecord {
    pub stack: String,
    /// Physical resource id of the invocation record.
    pub identity: String,
    /// Function invoked to perform the bootstrap.
    pub function_name: String,
    pub phase: BootstrapPhase,
    /// Number of times the initializer has been invoked for this identity.
    /// The current value is the token the claim owner presents to complete
    /// or release it.
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Unix timestamp (milliseconds) of the current or last claim.
    pub claimed_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub updated_at: u64,
}

impl BootstrapRecord {
    pub fn table_key(&self) -> String {
        bootstrap_key(&self.stack, &self.identity)
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.phase == BootstrapPhase::Bootstrapped
    }

    /// An `Invoking` claim strictly older than `stale_after_ms` belongs to a
    /// deployment that has already timed out.
    pub fn claim_is_stale(&self, now_ms: u64, stale_after_ms: u64) -> bool {
        match (self.phase, self.claimed_at) {
            (BootstrapPhase::Invoking, Some(at)) => now_ms.saturating_sub(at) > stale_after_ms,
            (BootstrapPhase::Invoking, None) => true,
            _ => false,
        }
    }
}

pub fn bootstrap_key(stack: &str, identity: &str) -> String {
    format!("{stack}/{identity}")
}

/// Result of trying to claim a bootstrap identity.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller now owns the `Invoking` claim and must invoke.
    Claimed(BootstrapRecord),
    /// Already done; nothing to invoke.
    AlreadyBootstrapped(BootstrapRecord),
    /// Another handler holds a live claim.
    InProgress(BootstrapRecord),
}

// ── Deployment ─────────────────────────────────────────────────────

/// Resolved outputs of a provisioned graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub stack: String,
    pub template: String,
    /// SHA-256 of the assembled graph, hex encoded.
    pub graph_digest: String,
    /// Logical id → attribute name → value.
    pub outputs: BTreeMap<String, BTreeMap<String, String>>,
    /// Logical ids in the order they were created.
    pub creation_order: Vec<String>,
    pub created_at: u64,
}

impl DeploymentRecord {
    pub fn table_key(&self) -> String {
        deployment_key(&self.stack, &self.template)
    }

    pub fn output(&self, logical_id: &str, attribute: &str) -> Option<&str> {
        self.outputs
            .get(logical_id)
            .and_then(|attrs| attrs.get(attribute))
            .map(String::as_str)
    }
}

pub fn deployment_key(stack: &str, template: &str) -> String {
    format!("{stack}/{template}")
}
