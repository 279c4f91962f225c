//! redb table definitions for the lightwatch state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Bootstrap invocation records keyed by `{stack}/{identity}`.
pub const BOOTSTRAPS: TableDefinition<&str, &[u8]> = TableDefinition::new("bootstraps");

/// Provisioned deployment records keyed by `{stack}/{template}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");
