//! Per-environment deployment status records
//!
//! Records are keyed `{stack}:{environment}` so one stack's records form a
//! contiguous prefix range.

use tracing::debug;

use flotilla_common::{EdgeStackId, EnvironmentId, FlotillaError, FlotillaResult};
use flotilla_persistence::{Table, Transaction, TransactionExt};

use crate::model::EdgeStackStatus;

fn status_key(stack_id: EdgeStackId, environment_id: EnvironmentId) -> String {
    format!("{}:{}", stack_id.storage_key(), environment_id.storage_key())
}

fn stack_prefix(stack_id: EdgeStackId) -> String {
    format!("{}:", stack_id.storage_key())
}

/// Whether a report for `report_version` must be discarded
///
/// Version 0 means the agent did not report one and is always accepted.
pub fn is_stale_report(report_version: u32, stack_version: u32) -> bool {
    report_version != 0 && report_version < stack_version
}

/// Keyed access to status records
#[derive(Clone, Copy, Debug, Default)]
pub struct EdgeStackStatusStore;

impl EdgeStackStatusStore {
    /// Create an empty record unless one already exists
    pub fn create(
        &self,
        tx: &mut dyn Transaction,
        stack_id: EdgeStackId,
        environment_id: EnvironmentId,
    ) -> FlotillaResult<()> {
        let key = status_key(stack_id, environment_id);
        if tx.contains(Table::EdgeStackStatus, &key)? {
            return Ok(());
        }
        tx.put_json(
            Table::EdgeStackStatus,
            &key,
            &EdgeStackStatus::new(stack_id, environment_id),
        )?;
        Ok(())
    }

    pub fn find(
        &self,
        tx: &dyn Transaction,
        stack_id: EdgeStackId,
        environment_id: EnvironmentId,
    ) -> FlotillaResult<Option<EdgeStackStatus>> {
        Ok(tx.get_json(Table::EdgeStackStatus, &status_key(stack_id, environment_id))?)
    }

    pub fn read(
        &self,
        tx: &dyn Transaction,
        stack_id: EdgeStackId,
        environment_id: EnvironmentId,
    ) -> FlotillaResult<EdgeStackStatus> {
        self.find(tx, stack_id, environment_id)?.ok_or_else(|| {
            FlotillaError::not_found(
                "edge stack status",
                format!("{}/{}", stack_id, environment_id),
            )
        })
    }

    pub fn update(&self, tx: &mut dyn Transaction, status: &EdgeStackStatus) -> FlotillaResult<()> {
        tx.put_json(
            Table::EdgeStackStatus,
            &status_key(status.edge_stack_id, status.endpoint_id),
            status,
        )?;
        Ok(())
    }

    pub fn delete(
        &self,
        tx: &mut dyn Transaction,
        stack_id: EdgeStackId,
        environment_id: EnvironmentId,
    ) -> FlotillaResult<()> {
        tx.delete(Table::EdgeStackStatus, &status_key(stack_id, environment_id))?;
        Ok(())
    }

    /// Every record of one stack, in environment order
    pub fn read_all(
        &self,
        tx: &dyn Transaction,
        stack_id: EdgeStackId,
    ) -> FlotillaResult<Vec<EdgeStackStatus>> {
        Ok(tx.scan_json(Table::EdgeStackStatus, &stack_prefix(stack_id))?)
    }

    /// Reset the timelines of `environment_ids`, keeping deployment info
    ///
    /// Environments without a record get an empty one.
    pub fn clear(
        &self,
        tx: &mut dyn Transaction,
        stack_id: EdgeStackId,
        environment_ids: &[EnvironmentId],
    ) -> FlotillaResult<()> {
        for environment_id in environment_ids {
            let mut status = self
                .find(tx, stack_id, *environment_id)?
                .unwrap_or_else(|| EdgeStackStatus::new(stack_id, *environment_id));
            status.clear();
            self.update(tx, &status)?;
        }
        debug!(stack_id = %stack_id, count = environment_ids.len(), "Cleared edge stack statuses");
        Ok(())
    }

    pub fn delete_all(&self, tx: &mut dyn Transaction, stack_id: EdgeStackId) -> FlotillaResult<()> {
        let keys: Vec<String> = tx
            .scan_prefix(Table::EdgeStackStatus, &stack_prefix(stack_id))?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        for key in &keys {
            tx.delete(Table::EdgeStackStatus, key)?;
        }
        debug!(stack_id = %stack_id, count = keys.len(), "Deleted edge stack statuses");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeploymentInfo, DeploymentStatusEvent, StatusType};
    use flotilla_persistence::{MemoryStore, StoreExt};

    #[test]
    fn test_stale_report_gating() {
        assert!(is_stale_report(2, 3));
        assert!(!is_stale_report(3, 3));
        assert!(!is_stale_report(4, 3));
        assert!(!is_stale_report(0, 3));
    }

    #[test]
    fn test_create_is_idempotent() {
        let store = MemoryStore::new();
        let statuses = EdgeStackStatusStore;
        let (stack, env) = (EdgeStackId::new(1), EnvironmentId::new(2));

        store
            .update(|tx| {
                statuses.create(tx, stack, env)?;
                let mut status = statuses.read(tx, stack, env)?;
                status.record_event(DeploymentStatusEvent {
                    time: 1,
                    status_type: StatusType::Running,
                    error: None,
                    version: 1,
                });
                statuses.update(tx, &status)?;
                statuses.create(tx, stack, env)
            })
            .unwrap();

        let status = store.view(|tx| statuses.read(tx, stack, env)).unwrap();
        assert_eq!(status.status.len(), 1);
    }

    #[test]
    fn test_read_all_is_scoped_to_stack() {
        let store = MemoryStore::new();
        let statuses = EdgeStackStatusStore;
        store
            .update(|tx| {
                for env in 1..=3 {
                    statuses.create(tx, EdgeStackId::new(1), EnvironmentId::new(env))?;
                }
                statuses.create(tx, EdgeStackId::new(10), EnvironmentId::new(1))
            })
            .unwrap();

        let all = store
            .view(|tx| statuses.read_all(tx, EdgeStackId::new(1)))
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|s| s.edge_stack_id == EdgeStackId::new(1)));

        store
            .update(|tx| statuses.delete_all(tx, EdgeStackId::new(1)))
            .unwrap();
        let remaining = store
            .view(|tx| statuses.read_all(tx, EdgeStackId::new(10)))
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn test_clear_keeps_deployment_info() {
        let store = MemoryStore::new();
        let statuses = EdgeStackStatusStore;
        let (stack, env) = (EdgeStackId::new(1), EnvironmentId::new(1));

        store
            .update(|tx| {
                let mut status = EdgeStackStatus::new(stack, env);
                status.deployment_info = DeploymentInfo {
                    version: 2,
                    file_version: 2,
                    config_hash: "abc".to_string(),
                };
                status.record_event(DeploymentStatusEvent {
                    time: 1,
                    status_type: StatusType::Error,
                    error: Some("pull failed".to_string()),
                    version: 2,
                });
                statuses.update(tx, &status)?;
                statuses.clear(tx, stack, &[env])
            })
            .unwrap();

        let status = store.view(|tx| statuses.read(tx, stack, env)).unwrap();
        assert!(status.status.is_empty());
        assert_eq!(status.deployment_info.config_hash, "abc");
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .view(|tx| EdgeStackStatusStore.read(tx, EdgeStackId::new(1), EnvironmentId::new(1)))
            .unwrap_err();
        assert!(matches!(err, FlotillaError::NotFound { .. }));
    }
}
