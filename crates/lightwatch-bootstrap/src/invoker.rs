//! Synchronous function invocation seam.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::InvokeError;

/// Result of an invocation that reached the function.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    Succeeded { payload: Option<Value> },
    /// The function ran and raised.
    FunctionError { message: String },
}

/// Invokes a function and waits for it to return.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, function_name: &str, payload: &Value) -> Result<InvocationOutcome, InvokeError>;
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub function_name: String,
    pub payload: Value,
}

/// Scripted behaviour for one call to a [`RecordingInvoker`].
#[derive(Debug, Clone)]
pub enum Scripted {
    Succeed,
    Fail(String),
    /// Succeed after sleeping.
    Delay(Duration),
    Unreachable(String),
    /// No function by that name is deployed.
    Missing,
}

/// In-process invoker that records every call and replays scripted
/// results in order, succeeding once the script runs out.
#[derive(Debug, Clone, Default)]
pub struct RecordingInvoker {
    calls: Arc<Mutex<Vec<Invocation>>>,
    script: Arc<Mutex<VecDeque<Scripted>>>,
}

impl RecordingInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            calls: Arc::default(),
            script: Arc::new(Mutex::new(script.into_iter().collect())),
        }
    }

    pub async fn push(&self, behaviour: Scripted) {
        self.script.lock().await.push_back(behaviour);
    }

    pub async fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl Invoker for RecordingInvoker {
    async fn invoke(&self, function_name: &str, payload: &Value) -> Result<InvocationOutcome, InvokeError> {
        self.calls.lock().await.push(Invocation {
            function_name: function_name.to_string(),
            payload: payload.clone(),
        });
        let next = self.script.lock().await.pop_front().unwrap_or(Scripted::Succeed);
        debug!(function = function_name, behaviour = ?next, "recorded invocation");
        match next {
            Scripted::Succeed => Ok(InvocationOutcome::Succeeded { payload: None }),
            Scripted::Fail(message) => Ok(InvocationOutcome::FunctionError { message }),
            Scripted::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(InvocationOutcome::Succeeded { payload: None })
            }
            Scripted::Unreachable(reason) => Err(InvokeError::Transport(reason)),
            Scripted::Missing => Err(InvokeError::NotFound(function_name.to_string())),
        }
    }
}
