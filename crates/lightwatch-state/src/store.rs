//! StateStore: redb-backed state persistence for lightwatch.
//!
//! Provides typed operations over bootstrap records and deployment
//! records. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, info, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(BOOTSTRAPS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Bootstraps ─────────────────────────────────────────────────

    /// Get the bootstrap record for an identity, if any.
    pub fn get_bootstrap(&self, stack: &str, identity: &str) -> StateResult<Option<BootstrapRecord>> {
        let key = bootstrap_key(stack, identity);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BOOTSTRAPS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: BootstrapRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all bootstrap records.
    pub fn list_bootstraps(&self) -> StateResult<Vec<BootstrapRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BOOTSTRAPS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: BootstrapRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Atomically move an identity to `Invoking` unless it is already
    /// bootstrapped or held by a live claim.
    ///
    /// Timestamps are unix milliseconds. A claim strictly older than
    /// `stale_after_ms` is taken over: its owner has exceeded the
    /// invocation timeout and therefore already failed. The returned
    /// record's `attempts` is the token for `complete_bootstrap` and
    /// `release_bootstrap`.
    pub fn claim_bootstrap(
        &self,
        stack: &str,
        identity: &str,
        function_name: &str,
        now: u64,
        stale_after_ms: u64,
    ) -> StateResult<ClaimOutcome> {
        let key = bootstrap_key(stack, identity);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome = {
            let mut table = txn.open_table(BOOTSTRAPS).map_err(map_err!(Table))?;
            let existing: Option<BootstrapRecord> = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };

            match existing {
                Some(record) if record.is_bootstrapped() => ClaimOutcome::AlreadyBootstrapped(record),
                Some(record)
                    if record.phase == BootstrapPhase::Invoking
                        && !record.claim_is_stale(now, stale_after_ms) =>
                {
                    ClaimOutcome::InProgress(record)
                }
                existing => {
                    if let Some(stale) = existing.as_ref().filter(|r| r.phase == BootstrapPhase::Invoking) {
                        warn!(%key, claimed_at = ?stale.claimed_at, attempt = stale.attempts, "taking over stale bootstrap claim");
                    }
                    let record = match existing {
                        Some(mut record) => {
                            record.phase = BootstrapPhase::Invoking;
                            record.function_name = function_name.to_string();
                            record.attempts += 1;
                            record.claimed_at = Some(now);
                            record.updated_at = now;
                            record
                        }
                        None => BootstrapRecord {
                            stack: stack.to_string(),
                            identity: identity.to_string(),
                            function_name: function_name.to_string(),
                            phase: BootstrapPhase::Invoking,
                            attempts: 1,
                            last_error: None,
                            claimed_at: Some(now),
                            completed_at: None,
                            updated_at: now,
                        },
                    };
                    let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    ClaimOutcome::Claimed(record)
                }
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, ?outcome, "bootstrap claim evaluated");
        Ok(outcome)
    }

    /// Mark a claimed identity as bootstrapped. `attempt` must be the
    /// token returned by the claim.
    pub fn complete_bootstrap(
        &self,
        stack: &str,
        identity: &str,
        attempt: u32,
        now: u64,
    ) -> StateResult<BootstrapRecord> {
        let record = self.transition(stack, identity, attempt, BootstrapPhase::Bootstrapped, |record| {
            record.last_error = None;
            record.completed_at = Some(now);
            record.updated_at = now;
        })?;
        info!(%stack, %identity, attempts = record.attempts, "bootstrap recorded");
        Ok(record)
    }

    /// Give up a claim after a failed invocation; the identity returns to
    /// `Unbootstrapped` so a later deployment may retry.
    pub fn release_bootstrap(
        &self,
        stack: &str,
        identity: &str,
        attempt: u32,
        error: &str,
        now: u64,
    ) -> StateResult<BootstrapRecord> {
        let record = self.transition(stack, identity, attempt, BootstrapPhase::Unbootstrapped, |record| {
            record.last_error = Some(error.to_string());
            record.updated_at = now;
        })?;
        warn!(%stack, %identity, error, "bootstrap claim released");
        Ok(record)
    }

    /// Move an `Invoking` record held by claim `attempt` to `to`, applying
    /// `update`.
    fn transition(
        &self,
        stack: &str,
        identity: &str,
        attempt: u32,
        to: BootstrapPhase,
        update: impl FnOnce(&mut BootstrapRecord),
    ) -> StateResult<BootstrapRecord> {
        let key = bootstrap_key(stack, identity);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let mut table = txn.open_table(BOOTSTRAPS).map_err(map_err!(Table))?;
            let mut record: BootstrapRecord = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                None => return Err(StateError::NotFound(key)),
            };
            if record.phase != BootstrapPhase::Invoking {
                return Err(StateError::InvalidTransition {
                    key,
                    from: record.phase.to_string(),
                    to: to.to_string(),
                });
            }
            if record.attempts != attempt {
                return Err(StateError::ClaimLost {
                    key,
                    attempt,
                    current: record.attempts,
                });
            }
            record.phase = to;
            update(&mut record);
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(record)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or update a deployment record.
    pub fn put_deployment(&self, record: &DeploymentRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "deployment stored");
        Ok(())
    }

    /// Get a deployment by stack and template.
    pub fn get_deployment(&self, stack: &str, template: &str) -> StateResult<Option<DeploymentRecord>> {
        let key = deployment_key(stack, template);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: DeploymentRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all deployments.
    pub fn list_deployments(&self) -> StateResult<Vec<DeploymentRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: DeploymentRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    const STACK: &str = "LightsStack";
    const IDENTITY: &str = "invocation upon creation";
    const FUNCTION: &str = "DBInitializerFn";

    fn claim(store: &StateStore, now: u64) -> ClaimOutcome {
        store.claim_bootstrap(STACK, IDENTITY, FUNCTION, now, 300).unwrap()
    }

    fn test_deployment(template: &str) -> DeploymentRecord {
        let mut attrs = BTreeMap::new();
        attrs.insert("arn".to_string(), "arn:aws:sqs:us-east-1:123456789012:q".to_string());
        let mut outputs = BTreeMap::new();
        outputs.insert("DataCollectionLightBehaviorQueue0A1B2C3D".to_string(), attrs);
        DeploymentRecord {
            stack: STACK.to_string(),
            template: template.to_string(),
            graph_digest: "ab".repeat(32),
            outputs,
            creation_order: vec!["DataCollectionLightBehaviorQueue0A1B2C3D".to_string()],
            created_at: 1000,
        }
    }

    // ── Bootstrap lifecycle ────────────────────────────────────────

    #[test]
    fn first_claim_creates_invoking_record() {
        let store = StateStore::open_in_memory().unwrap();
        match claim(&store, 100) {
            ClaimOutcome::Claimed(record) => {
                assert_eq!(record.phase, BootstrapPhase::Invoking);
                assert_eq!(record.attempts, 1);
                assert_eq!(record.claimed_at, Some(100));
            }
            other => panic!("expected Claimed, got {other:?}"),
        }
        let stored = store.get_bootstrap(STACK, IDENTITY).unwrap().unwrap();
        assert_eq!(stored.phase, BootstrapPhase::Invoking);
    }

    #[test]
    fn live_claim_blocks_second_claim() {
        let store = StateStore::open_in_memory().unwrap();
        claim(&store, 100);
        assert!(matches!(claim(&store, 150), ClaimOutcome::InProgress(_)));
    }

    #[test]
    fn stale_claim_is_taken_over() {
        let store = StateStore::open_in_memory().unwrap();
        claim(&store, 100);
        match claim(&store, 401) {
            ClaimOutcome::Claimed(record) => assert_eq!(record.attempts, 2),
            other => panic!("expected Claimed, got {other:?}"),
        }
    }

    #[test]
    fn claim_at_exact_staleness_bound_is_still_live() {
        let store = StateStore::open_in_memory().unwrap();
        claim(&store, 100);
        assert!(matches!(claim(&store, 400), ClaimOutcome::InProgress(_)));
    }

    #[test]
    fn superseded_owner_cannot_complete_or_release() {
        let store = StateStore::open_in_memory().unwrap();
        claim(&store, 100);
        assert!(matches!(claim(&store, 500), ClaimOutcome::Claimed(_)));

        // The first owner's late result must not touch the second claim.
        assert!(matches!(
            store.release_bootstrap(STACK, IDENTITY, 1, "timed out", 510),
            Err(StateError::ClaimLost { attempt: 1, current: 2, .. })
        ));
        assert!(matches!(
            store.complete_bootstrap(STACK, IDENTITY, 1, 510),
            Err(StateError::ClaimLost { attempt: 1, current: 2, .. })
        ));
        let live = store.get_bootstrap(STACK, IDENTITY).unwrap().unwrap();
        assert_eq!(live.phase, BootstrapPhase::Invoking);
        assert!(matches!(claim(&store, 520), ClaimOutcome::InProgress(_)));

        let done = store.complete_bootstrap(STACK, IDENTITY, 2, 530).unwrap();
        assert!(done.is_bootstrapped());
    }

    #[test]
    fn bootstrapped_is_terminal() {
        let store = StateStore::open_in_memory().unwrap();
        claim(&store, 100);
        let done = store.complete_bootstrap(STACK, IDENTITY, 1, 120).unwrap();
        assert!(done.is_bootstrapped());
        assert_eq!(done.completed_at, Some(120));

        // Neither a new claim nor time passing reopens it.
        assert!(matches!(claim(&store, 130), ClaimOutcome::AlreadyBootstrapped(_)));
        assert!(matches!(claim(&store, 100_000), ClaimOutcome::AlreadyBootstrapped(_)));
        assert!(matches!(
            store.release_bootstrap(STACK, IDENTITY, 1, "late failure", 140),
            Err(StateError::InvalidTransition { .. })
        ));
        assert_eq!(store.get_bootstrap(STACK, IDENTITY).unwrap().unwrap().attempts, 1);
    }

    #[test]
    fn released_claim_can_be_retried() {
        let store = StateStore::open_in_memory().unwrap();
        claim(&store, 100);
        let released = store.release_bootstrap(STACK, IDENTITY, 1, "timed out", 110).unwrap();
        assert_eq!(released.phase, BootstrapPhase::Unbootstrapped);
        assert_eq!(released.last_error.as_deref(), Some("timed out"));

        match claim(&store, 120) {
            ClaimOutcome::Claimed(record) => {
                assert_eq!(record.attempts, 2);
                assert_eq!(record.last_error.as_deref(), Some("timed out"));
            }
            other => panic!("expected Claimed, got {other:?}"),
        }
        let done = store.complete_bootstrap(STACK, IDENTITY, 2, 130).unwrap();
        assert_eq!(done.last_error, None);
    }

    #[test]
    fn complete_without_claim_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(matches!(
            store.complete_bootstrap(STACK, IDENTITY, 1, 1),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn identities_are_independent() {
        let store = StateStore::open_in_memory().unwrap();
        claim(&store, 100);
        store.complete_bootstrap(STACK, IDENTITY, 1, 110).unwrap();

        let other = store
            .claim_bootstrap(STACK, "invocation upon creation v2", FUNCTION, 120, 300)
            .unwrap();
        assert!(matches!(other, ClaimOutcome::Claimed(_)));
        assert_eq!(store.list_bootstraps().unwrap().len(), 2);
    }

    // ── Deployments ────────────────────────────────────────────────

    #[test]
    fn deployment_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let record = test_deployment("home");
        store.put_deployment(&record).unwrap();

        let retrieved = store.get_deployment(STACK, "home").unwrap();
        assert_eq!(retrieved, Some(record));
        assert!(store.get_deployment(STACK, "office").unwrap().is_none());
    }

    #[test]
    fn deployment_output_lookup() {
        let record = test_deployment("home");
        assert_eq!(
            record.output("DataCollectionLightBehaviorQueue0A1B2C3D", "arn"),
            Some("arn:aws:sqs:us-east-1:123456789012:q")
        );
        assert_eq!(record.output("missing", "arn"), None);
    }

    #[test]
    fn deployment_list_all() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_deployment(&test_deployment("home")).unwrap();
        store.put_deployment(&test_deployment("office")).unwrap();
        assert_eq!(store.list_deployments().unwrap().len(), 2);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn bootstrap_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("lightwatch.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            claim(&store, 100);
            store.complete_bootstrap(STACK, IDENTITY, 1, 110).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert!(matches!(claim(&store, 200), ClaimOutcome::AlreadyBootstrapped(_)));
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.list_bootstraps().unwrap().is_empty());
        assert!(store.list_deployments().unwrap().is_empty());
        assert!(store.get_bootstrap(STACK, IDENTITY).unwrap().is_none());
    }
}
