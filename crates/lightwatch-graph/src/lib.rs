//! lightwatch-graph: the provisioning orchestration core.
//!
//! Turns a `lightwatch.toml` template into a dependency-ordered resource
//! graph for the usage data pipeline and walks it against a provisioning
//! engine.
//!
//! # Components
//!
//! - **`assembler`**: builds the graph from config, fails fast on bad input
//! - **`graph`**: resources, cross-resource references, validation, creation order
//! - **`network`**: VPC topology, subnet tiers, placement selection
//! - **`credentials`**: password generation, secret and parameter pointer
//! - **`boundary`**: security groups and the network/credential gates
//! - **`policy`**: least-privilege statements per compute unit
//! - **`resources`**: database, queue, topic, functions, bootstrap resources
//! - **`engine`**: `ProvisioningEngine` seam, in-memory engine, provisioner
//!
//! ```text
//! Network → Secret/Parameter → Boundaries → Database → Queue
//!         → Writer (+ event binding) → Initializer → Provider → Bootstrap
//! ```

pub mod assembler;
pub mod boundary;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod graph;
pub mod network;
pub mod policy;
pub mod resources;

pub use assembler::{Assembler, DATA_COLLECTION_SCOPE};
pub use engine::{InMemoryEngine, ProvisionedGraph, ProvisioningEngine, Provisioner};
pub use error::{EngineError, GraphError, GraphResult};
pub use graph::{AttrRef, Attribute, Resource, ResourceGraph, ResourceKind, ResourceSpec};
