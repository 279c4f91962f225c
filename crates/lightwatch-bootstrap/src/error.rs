//! Bootstrap error types.

use std::time::Duration;

use lightwatch_state::StateError;
use thiserror::Error;

/// Errors raised by an [`Invoker`](crate::invoker::Invoker) before the
/// function itself ran.
#[derive(Debug, Error, PartialEq)]
pub enum InvokeError {
    #[error("function not found: {0}")]
    NotFound(String),

    #[error("invocation transport failed: {0}")]
    Transport(String),
}

/// Errors that fail a bootstrap attempt. Each one leaves the identity
/// `Unbootstrapped`, so redeploying retries.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("invoke error: {0}")]
    Invoke(#[from] InvokeError),

    #[error("initializer {function} failed: {message}")]
    FunctionFailed { function: String, message: String },

    #[error("initializer {function} did not return within {timeout:?}")]
    Timeout { function: String, timeout: Duration },

    #[error("bootstrap `{identity}` is already being run by another handler")]
    InProgress { identity: String },

    #[error("event payload could not be encoded: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type BootstrapResult<T> = Result<T, BootstrapError>;
