use crate::domain::{DeployRecord, DeployRequest, DeployState, Instance, Store};
use crate::services::ReconcileContext;
use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Last known configuration of the host.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// `None` on a host that never deployed anything.
    pub record_id: Option<u64>,
    pub requested: DeployRequest,
    pub deployed: Vec<Instance>,
}

impl Snapshot {
    fn from_record(record: DeployRecord) -> Self {
        Self {
            record_id: Some(record.id),
            requested: record.requested,
            deployed: record.deployed,
        }
    }
}

/// Result of a journaled operation.
#[derive(Debug)]
pub enum DeployOutcome {
    /// The new configuration is live and recorded ACTIVE.
    Deployed {
        record: DeployRecord,
        warnings: Vec<String>,
    },
    /// The operation failed before touching the host.
    Rejected(anyhow::Error),
    /// The operation failed midway and the previous configuration was
    /// replayed. `restored` is `None` when there was nothing to restore.
    RolledBack {
        cause: anyhow::Error,
        restored: Option<DeployRecord>,
    },
}

impl DeployOutcome {
    pub fn is_deployed(&self) -> bool {
        matches!(self, Self::Deployed { .. })
    }
}

/// Compensating action run when an operation fails after mutating the host.
pub trait Replay {
    /// Bring the host back to `snapshot`, returns the instances now running.
    fn replay(&self, snapshot: &[Instance], ctx: &ReconcileContext) -> Result<Vec<Instance>>;
}

/// Persists deploy records and rolls the host back on failure.
#[derive(Debug, Clone)]
pub struct StateJournal {
    store: Arc<dyn Store>,
}

impl StateJournal {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Most recent ACTIVE record, else PREVIOUS, else INACTIVE.
    pub fn read_current_state(&self) -> Result<Snapshot> {
        for state in [DeployState::Active, DeployState::Previous, DeployState::Inactive] {
            let records = self
                .store
                .records(Some(state))
                .with_context(|| format!("reading {state} deploy records"))?;
            if let Some(record) = records.into_iter().last() {
                return Ok(Snapshot::from_record(record));
            }
        }
        Ok(Snapshot::default())
    }

    /// Record a successful deployment as the only ACTIVE one.
    pub fn store_deployed_state(
        &self,
        requested: DeployRequest,
        deployed: Vec<Instance>,
        previous_id: Option<u64>,
    ) -> Result<DeployRecord> {
        for record in self.store.records(Some(DeployState::Active))? {
            self.store.set_record_state(record.id, DeployState::Inactive)?;
        }
        if let Some(previous) = previous_id {
            self.store
                .set_record_state(previous, DeployState::Inactive)
                .with_context(|| format!("demoting deploy record {previous}"))?;
        }

        let mut record = DeployRecord::new(requested, deployed, DeployState::Active, previous_id);
        record.id = self
            .store
            .add_record(record.clone())
            .context("storing deploy record")?;
        info!("deploy record {} is active", record.id);
        Ok(record)
    }

    /// Run `operation` against the current snapshot and journal its result.
    ///
    /// The operation sets `ctx.mutated` before touching the host; failures
    /// after that point replay the snapshot through `replay`.
    pub fn restore_if_fail<F>(&self, replay: &dyn Replay, operation: F) -> Result<DeployOutcome>
    where
        F: FnOnce(&mut ReconcileContext) -> Result<Vec<Instance>>,
    {
        let snapshot = self.read_current_state()?;
        if let Some(id) = snapshot.record_id {
            self.store.set_record_state(id, DeployState::Previous)?;
        }

        let mut ctx = ReconcileContext::new(snapshot.requested.clone(), snapshot.deployed.clone());
        let cause = match operation(&mut ctx) {
            Ok(deployed) => {
                let record =
                    self.store_deployed_state(ctx.requested, deployed, snapshot.record_id)?;
                return Ok(DeployOutcome::Deployed {
                    record,
                    warnings: ctx.warnings,
                });
            }
            Err(cause) => cause,
        };

        if !ctx.mutated {
            warn!("operation rejected: {cause:#}");
            self.reactivate(&snapshot)?;
            return Ok(DeployOutcome::Rejected(cause));
        }

        error!("operation failed after changing the host: {cause:#}");
        let failed = DeployRecord::new(
            ctx.requested.clone(),
            ctx.touched.clone(),
            DeployState::Failed,
            snapshot.record_id,
        );
        self.store
            .add_record(failed)
            .context("storing failed deploy record")?;

        info!("restoring the previous configuration");
        match replay.replay(&snapshot.deployed, &ctx) {
            Ok(_) => {
                let restored = self.reactivate(&snapshot)?;
                Ok(DeployOutcome::RolledBack { cause, restored })
            }
            Err(rollback) => Err(anyhow!(
                "deployment failed: {cause:#}; restoring the previous configuration also failed: {rollback:#}"
            )),
        }
    }

    fn reactivate(&self, snapshot: &Snapshot) -> Result<Option<DeployRecord>> {
        let Some(id) = snapshot.record_id else {
            return Ok(None);
        };
        self.store.set_record_state(id, DeployState::Active)?;
        let record = self
            .store
            .records(Some(DeployState::Active))?
            .into_iter()
            .find(|r| r.id == id);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeployError;
    use crate::test_support::MemoryStore;
    use std::cell::Cell;

    #[derive(Default)]
    struct CountingReplay {
        calls: Cell<usize>,
        fail: bool,
    }

    impl Replay for CountingReplay {
        fn replay(&self, snapshot: &[Instance], _ctx: &ReconcileContext) -> Result<Vec<Instance>> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                anyhow::bail!("runtime unavailable");
            }
            Ok(snapshot.to_vec())
        }
    }

    fn instance(label: &str) -> Instance {
        Instance {
            label: label.into(),
            label_id: label.into(),
            domain: format!("{label}.example.com"),
            ..Default::default()
        }
    }

    fn active_count(store: &MemoryStore) -> usize {
        store.records(Some(DeployState::Active)).unwrap().len()
    }

    fn journal_with_baseline() -> (Arc<MemoryStore>, StateJournal) {
        let store = Arc::new(MemoryStore::new());
        let journal = StateJournal::new(store.clone());
        journal
            .store_deployed_state(DeployRequest::default(), vec![instance("old")], None)
            .unwrap();
        (store, journal)
    }

    #[test]
    fn test_empty_baseline() {
        let journal = StateJournal::new(Arc::new(MemoryStore::new()));
        let snapshot = journal.read_current_state().unwrap();
        assert!(snapshot.record_id.is_none());
        assert!(snapshot.deployed.is_empty());
    }

    #[test]
    fn test_success_chains_records() {
        let (store, journal) = journal_with_baseline();
        let replay = CountingReplay::default();

        let outcome = journal
            .restore_if_fail(&replay, |ctx| {
                ctx.mutated = true;
                Ok(vec![instance("new")])
            })
            .unwrap();

        let DeployOutcome::Deployed { record, .. } = outcome else {
            panic!("expected a deployment");
        };
        assert_eq!(record.previous_id, Some(1));
        assert_eq!(active_count(&store), 1);
        assert_eq!(store.records(Some(DeployState::Inactive)).unwrap().len(), 1);
        assert_eq!(journal.read_current_state().unwrap().deployed[0].label, "new");
    }

    #[test]
    fn test_rejection_reactivates_snapshot() {
        let (store, journal) = journal_with_baseline();
        let replay = CountingReplay::default();

        let outcome = journal
            .restore_if_fail(&replay, |_ctx| Err(DeployError::PortConflict(9001).into()))
            .unwrap();

        assert!(matches!(outcome, DeployOutcome::Rejected(_)));
        assert_eq!(replay.calls.get(), 0);
        assert_eq!(active_count(&store), 1);
        assert_eq!(journal.read_current_state().unwrap().record_id, Some(1));
    }

    #[test]
    fn test_failure_after_mutation_replays() {
        let (store, journal) = journal_with_baseline();
        let replay = CountingReplay::default();

        let outcome = journal
            .restore_if_fail(&replay, |ctx| {
                ctx.mutated = true;
                anyhow::bail!("container failed to start")
            })
            .unwrap();

        let DeployOutcome::RolledBack { cause, restored } = outcome else {
            panic!("expected a rollback");
        };
        assert!(cause.to_string().contains("failed to start"));
        assert_eq!(restored.unwrap().deployed[0].label, "old");
        assert_eq!(replay.calls.get(), 1);
        assert_eq!(active_count(&store), 1);
        assert_eq!(store.records(Some(DeployState::Failed)).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_rollback_reports_both_causes() {
        let (store, journal) = journal_with_baseline();
        let replay = CountingReplay {
            fail: true,
            ..Default::default()
        };

        let err = journal
            .restore_if_fail(&replay, |ctx| {
                ctx.mutated = true;
                anyhow::bail!("container failed to start")
            })
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("failed to start"));
        assert!(message.contains("runtime unavailable"));
        assert_eq!(active_count(&store), 0);
        // the snapshot stays readable through the PREVIOUS fallback
        assert_eq!(journal.read_current_state().unwrap().record_id, Some(1));
    }
}
