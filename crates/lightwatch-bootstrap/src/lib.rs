//! lightwatch-bootstrap: run-once schema bootstrap for a deployment.
//!
//! A custom-resource handler that, on the stack's create event,
//! synchronously invokes the initializer function and records success in
//! the state store so later deployments never run it again.
//!
//! # Components
//!
//! - **`lifecycle`**: create/update/delete events and SUCCESS/FAILED responses
//! - **`invoker`**: the `Invoker` seam and an in-process recording invoker
//! - **`orchestrator`**: the `Unbootstrapped → Invoking → Bootstrapped` state machine

pub mod error;
pub mod invoker;
pub mod lifecycle;
pub mod orchestrator;

pub use error::{BootstrapError, BootstrapResult, InvokeError};
pub use invoker::{InvocationOutcome, Invoker, RecordingInvoker, Scripted};
pub use lifecycle::{LifecycleEvent, LifecycleResponse, RequestType, ResponseStatus};
pub use orchestrator::{BootstrapOrchestrator, BootstrapOutcome, BootstrapSettings};
