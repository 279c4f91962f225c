//! lightwatch-state: durable state for lightwatch deployments.
//!
//! Backed by [redb](https://docs.rs/redb). Holds the bootstrap invocation
//! records that make the schema initializer run at most once per identity,
//! and the resolved outputs of provisioned graphs.
//!
//! # Architecture
//!
//! Values are JSON-serialized into redb's `&[u8]` value columns, keyed by
//! `{stack}/{identity}` and `{stack}/{template}`. Claiming a bootstrap is a
//! single write transaction, so two handlers racing on the same identity
//! cannot both win.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
