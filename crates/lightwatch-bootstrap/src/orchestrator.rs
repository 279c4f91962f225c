//! Bootstrap orchestrator: runs the schema initializer exactly once.
//!
//! Drives a bootstrap identity through `Unbootstrapped → Invoking →
//! Bootstrapped`. The claim is taken atomically in the state store before
//! the initializer is invoked, so duplicate or concurrent create events
//! for the same identity invoke it at most once. A failed or timed-out
//! invocation releases the claim; the deployment fails and a redeploy
//! retries. There is no retry loop here.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lightwatch_state::{BootstrapRecord, ClaimOutcome, StateResult, StateStore};
use tracing::{debug, info, warn};

use crate::error::{BootstrapError, BootstrapResult};
use crate::invoker::{InvocationOutcome, Invoker};
use crate::lifecycle::{LifecycleEvent, LifecycleResponse, RequestType};

/// What the orchestrator needs to know about its one target.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapSettings {
    pub stack: String,
    /// Physical id of the invocation record; the run-once key.
    pub identity: String,
    pub function_name: String,
    /// Bound on one invocation. An `Invoking` claim older than this plus a
    /// one second grace is considered abandoned.
    pub timeout: Duration,
}

/// How an event was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapOutcome {
    /// The initializer ran and succeeded.
    Invoked(BootstrapRecord),
    /// The identity was already bootstrapped; the initializer stays dormant.
    AlreadyBootstrapped(BootstrapRecord),
    /// Nothing to do for this event.
    NoOp {
        request_type: RequestType,
        physical_resource_id: String,
    },
}

impl BootstrapOutcome {
    pub fn physical_resource_id(&self) -> &str {
        match self {
            BootstrapOutcome::Invoked(record) | BootstrapOutcome::AlreadyBootstrapped(record) => &record.identity,
            BootstrapOutcome::NoOp {
                physical_resource_id, ..
            } => physical_resource_id,
        }
    }

    pub fn invoked(&self) -> bool {
        matches!(self, BootstrapOutcome::Invoked(_))
    }
}

pub struct BootstrapOrchestrator<I> {
    store: StateStore,
    invoker: I,
    settings: BootstrapSettings,
}

impl<I: Invoker> BootstrapOrchestrator<I> {
    pub fn new(store: StateStore, invoker: I, settings: BootstrapSettings) -> Self {
        Self {
            store,
            invoker,
            settings,
        }
    }

    pub fn settings(&self) -> &BootstrapSettings {
        &self.settings
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    /// Current record for the configured identity.
    pub fn status(&self) -> StateResult<Option<BootstrapRecord>> {
        self.store.get_bootstrap(&self.settings.stack, &self.settings.identity)
    }

    /// Handle one event and build the response for the provisioning engine.
    /// Errors become `FAILED` responses.
    pub async fn handle(&self, event: &LifecycleEvent) -> LifecycleResponse {
        match self.run(event).await {
            Ok(outcome) => LifecycleResponse::success(event, outcome.physical_resource_id()),
            Err(err) => {
                warn!(
                    stack = %self.settings.stack,
                    identity = %self.settings.identity,
                    request_type = %event.request_type,
                    error = %err,
                    "bootstrap failed"
                );
                let physical = event
                    .physical_resource_id
                    .as_deref()
                    .unwrap_or(self.settings.identity.as_str());
                LifecycleResponse::failed(event, physical, &err.to_string())
            }
        }
    }

    /// Handle one event.
    ///
    /// `Create` bootstraps the configured identity. `Update` does too when
    /// the identity differs from the event's physical id (the record was
    /// replaced); otherwise it, like `Delete`, returns the existing id.
    pub async fn run(&self, event: &LifecycleEvent) -> BootstrapResult<BootstrapOutcome> {
        let identity = &self.settings.identity;
        match (event.request_type, event.physical_resource_id.as_deref()) {
            (RequestType::Create, _) => self.bootstrap(event).await,
            (RequestType::Update, Some(existing)) if existing != identity.as_str() => {
                info!(from = existing, to = %identity, "bootstrap identity changed");
                self.bootstrap(event).await
            }
            (request_type, physical) => {
                let physical_resource_id = physical.unwrap_or(identity.as_str()).to_string();
                debug!(%request_type, physical = %physical_resource_id, "no bootstrap action");
                Ok(BootstrapOutcome::NoOp {
                    request_type,
                    physical_resource_id,
                })
            }
        }
    }

    async fn bootstrap(&self, event: &LifecycleEvent) -> BootstrapResult<BootstrapOutcome> {
        let BootstrapSettings {
            stack,
            identity,
            function_name,
            timeout,
        } = &self.settings;

        let stale_after = stale_after_ms(*timeout);
        let claim = self
            .store
            .claim_bootstrap(stack, identity, function_name, unix_now_ms(), stale_after)?;
        let record = match claim {
            ClaimOutcome::AlreadyBootstrapped(record) => {
                info!(%stack, %identity, "already bootstrapped; initializer stays dormant");
                return Ok(BootstrapOutcome::AlreadyBootstrapped(record));
            }
            ClaimOutcome::InProgress(_) => {
                return Err(BootstrapError::InProgress {
                    identity: identity.clone(),
                });
            }
            ClaimOutcome::Claimed(record) => record,
        };

        let attempt = record.attempts;
        info!(%stack, %identity, function = %function_name, attempt, "invoking initializer");
        let payload = serde_json::to_value(event)?;
        let failure = match tokio::time::timeout(*timeout, self.invoker.invoke(function_name, &payload)).await {
            Ok(Ok(InvocationOutcome::Succeeded { .. })) => None,
            Ok(Ok(InvocationOutcome::FunctionError { message })) => Some(BootstrapError::FunctionFailed {
                function: function_name.clone(),
                message,
            }),
            Ok(Err(err)) => Some(BootstrapError::Invoke(err)),
            Err(_) => Some(BootstrapError::Timeout {
                function: function_name.clone(),
                timeout: *timeout,
            }),
        };

        match failure {
            None => {
                let record = self
                    .store
                    .complete_bootstrap(stack, identity, attempt, unix_now_ms())?;
                info!(%stack, %identity, attempt, "initializer succeeded; bootstrap complete");
                Ok(BootstrapOutcome::Invoked(record))
            }
            Some(err) => {
                if let Err(release) = self
                    .store
                    .release_bootstrap(stack, identity, attempt, &err.to_string(), unix_now_ms())
                {
                    warn!(%stack, %identity, attempt, error = %release, "could not release bootstrap claim");
                }
                Err(err)
            }
        }
    }
}

/// Margin added to the invocation timeout before a claim counts as
/// abandoned. Covers clock reads on either side of the claim.
const CLAIM_GRACE: Duration = Duration::from_secs(1);

fn stale_after_ms(timeout: Duration) -> u64 {
    u64::try_from((timeout + CLAIM_GRACE).as_millis()).unwrap_or(u64::MAX)
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
