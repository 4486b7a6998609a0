//! Endpoint relation store
//!
//! One record per environment listing the stacks that currently target it.
//! Stack deployment counters are derived from these records:
//!
//! - the stack-facing helpers (`add_relations_for_stack`,
//!   `remove_relations_for_stack`) adjust the counter by the number of records
//!   they changed
//! - direct record mutations (`create`, `update`, `delete`) recount every
//!   stack whose flag differs between the old and new record by scanning all
//!   relations in the same transaction
//!
//! Counters are written through [`StackCounterUpdater`] so this module does not
//! depend on the stack store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use flotilla_common::{EdgeStackId, EnvironmentId, FlotillaError, FlotillaResult};
use flotilla_persistence::{KvStore, StoreExt, Table, Transaction, TransactionExt};

use crate::cache::{RelationCache, RelationSnapshot};
use crate::model::EndpointRelation;

/// Writes deployment counters on behalf of the relation store
pub trait StackCounterUpdater: Send + Sync {
    /// Add `delta` (possibly negative) to the stack's deployment count
    fn adjust_deployments(
        &self,
        tx: &mut dyn Transaction,
        stack_id: EdgeStackId,
        delta: i64,
    ) -> FlotillaResult<()>;

    /// Overwrite the stack's deployment count
    fn set_deployments(
        &self,
        tx: &mut dyn Transaction,
        stack_id: EdgeStackId,
        count: u32,
    ) -> FlotillaResult<()>;
}

fn relation_key(environment_id: EnvironmentId) -> String {
    environment_id.storage_key()
}

/// Keyed access to endpoint relations plus counter maintenance
///
/// Mutations invalidate cached state immediately and again from a commit hook
/// of the writing transaction, so a reader racing the commit cannot leave
/// pre-commit state behind.
pub struct EndpointRelationStore {
    counter: Arc<dyn StackCounterUpdater>,
    cache: Arc<dyn RelationCache>,
    snapshot: Arc<RelationSnapshot>,
}

impl EndpointRelationStore {
    pub fn new(counter: Arc<dyn StackCounterUpdater>, cache: Arc<dyn RelationCache>) -> Self {
        Self {
            counter,
            cache,
            snapshot: Arc::new(RelationSnapshot::default()),
        }
    }

    pub fn find(
        &self,
        tx: &dyn Transaction,
        environment_id: EnvironmentId,
    ) -> FlotillaResult<Option<EndpointRelation>> {
        Ok(tx.get_json(Table::EndpointRelations, &relation_key(environment_id))?)
    }

    pub fn get(
        &self,
        tx: &dyn Transaction,
        environment_id: EnvironmentId,
    ) -> FlotillaResult<EndpointRelation> {
        self.find(tx, environment_id)?
            .ok_or_else(|| FlotillaError::not_found("endpoint relation", environment_id))
    }

    pub fn list(&self, tx: &dyn Transaction) -> FlotillaResult<Vec<EndpointRelation>> {
        Ok(tx.scan_json(Table::EndpointRelations, "")?)
    }

    /// Store a new relation and recount the stacks it targets
    pub fn create(
        &self,
        tx: &mut dyn Transaction,
        relation: &EndpointRelation,
    ) -> FlotillaResult<()> {
        if self.find(tx, relation.endpoint_id)?.is_some() {
            return Err(FlotillaError::conflict(format!(
                "endpoint relation for environment {} already exists",
                relation.endpoint_id
            )));
        }
        self.write(tx, relation)?;
        self.recompute(tx, &relation.active_stacks())
    }

    /// Replace a relation and recount every stack whose flag changed
    pub fn update(
        &self,
        tx: &mut dyn Transaction,
        environment_id: EnvironmentId,
        relation: &EndpointRelation,
    ) -> FlotillaResult<()> {
        let previous = self.find(tx, environment_id)?.unwrap_or_default();

        let mut relation = relation.clone();
        relation.endpoint_id = environment_id;
        self.write(tx, &relation)?;

        let affected: BTreeSet<EdgeStackId> = previous
            .active_stacks()
            .symmetric_difference(&relation.active_stacks())
            .copied()
            .collect();
        self.recompute(tx, &affected)
    }

    /// Remove a relation and recount the stacks it targeted
    pub fn delete(
        &self,
        tx: &mut dyn Transaction,
        environment_id: EnvironmentId,
    ) -> FlotillaResult<()> {
        let previous = self.get(tx, environment_id)?;
        tx.delete(Table::EndpointRelations, &relation_key(environment_id))?;
        self.invalidate_on_commit(tx, environment_id)?;
        self.recompute(tx, &previous.active_stacks())
    }

    /// Flag `stack_id` on every listed environment and raise its counter
    pub fn add_relations_for_stack(
        &self,
        tx: &mut dyn Transaction,
        environment_ids: &[EnvironmentId],
        stack_id: EdgeStackId,
    ) -> FlotillaResult<()> {
        let mut added = 0i64;
        for environment_id in environment_ids {
            let mut relation = self.get(tx, *environment_id)?;
            if !relation.targets(stack_id) {
                added += 1;
            }
            relation.edge_stacks.insert(stack_id, true);
            self.write(tx, &relation)?;
        }

        if added > 0 {
            self.counter.adjust_deployments(tx, stack_id, added)?;
        }
        debug!(stack_id = %stack_id, added, "Added endpoint relations for edge stack");
        Ok(())
    }

    /// Unflag `stack_id` on every listed environment and lower its counter
    pub fn remove_relations_for_stack(
        &self,
        tx: &mut dyn Transaction,
        environment_ids: &[EnvironmentId],
        stack_id: EdgeStackId,
    ) -> FlotillaResult<()> {
        let mut removed = 0i64;
        for environment_id in environment_ids {
            let Some(mut relation) = self.find(tx, *environment_id)? else {
                continue;
            };
            if relation.edge_stacks.remove(&stack_id) == Some(true) {
                removed += 1;
            }
            self.write(tx, &relation)?;
        }

        if removed > 0 {
            self.counter.adjust_deployments(tx, stack_id, -removed)?;
        }
        debug!(stack_id = %stack_id, removed, "Removed endpoint relations for edge stack");
        Ok(())
    }

    /// Overwrite the counters of `stack_ids` with their true deployment counts
    pub fn recompute(
        &self,
        tx: &mut dyn Transaction,
        stack_ids: &BTreeSet<EdgeStackId>,
    ) -> FlotillaResult<()> {
        if stack_ids.is_empty() {
            return Ok(());
        }

        let mut counts: BTreeMap<EdgeStackId, u32> =
            stack_ids.iter().map(|id| (*id, 0)).collect();
        for relation in self.list(tx)? {
            for stack_id in relation.active_stacks() {
                if let Some(count) = counts.get_mut(&stack_id) {
                    *count += 1;
                }
            }
        }

        for (stack_id, count) in counts {
            debug!(stack_id = %stack_id, count, "Recomputed edge stack deployment count");
            self.counter.set_deployments(tx, stack_id, count)?;
        }
        Ok(())
    }

    /// Read a relation through the cache
    pub fn cached(
        &self,
        store: &dyn KvStore,
        environment_id: EnvironmentId,
    ) -> FlotillaResult<EndpointRelation> {
        if let Some(relation) = self.cache.get(environment_id) {
            return Ok(relation);
        }

        // Filled while the read transaction still holds off commits
        store.view(|tx| {
            let relation = self.get(tx, environment_id)?;
            self.cache.insert(relation.clone());
            Ok(relation)
        })
    }

    /// Stacks currently targeting `environment_id`, read through the cache
    pub fn stacks_for_endpoint(
        &self,
        store: &dyn KvStore,
        environment_id: EnvironmentId,
    ) -> FlotillaResult<BTreeSet<EdgeStackId>> {
        Ok(self.cached(store, environment_id)?.active_stacks())
    }

    /// Every relation, served from the snapshot when it is still valid
    pub fn list_cached(&self, store: &dyn KvStore) -> FlotillaResult<Arc<Vec<EndpointRelation>>> {
        if let Some(relations) = self.snapshot.get() {
            return Ok(relations);
        }

        store.view(|tx| {
            let relations = self.list(tx)?;
            Ok(self.snapshot.set(relations))
        })
    }

    /// Drop cached state for `environment_id`
    pub fn invalidate(&self, environment_id: EnvironmentId) {
        self.cache.invalidate(environment_id);
        self.snapshot.invalidate();
    }

    /// Invalidate now and once more when `tx` commits
    fn invalidate_on_commit(
        &self,
        tx: &mut dyn Transaction,
        environment_id: EnvironmentId,
    ) -> FlotillaResult<()> {
        self.invalidate(environment_id);

        let cache = self.cache.clone();
        let snapshot = self.snapshot.clone();
        tx.on_commit(Box::new(move || {
            cache.invalidate(environment_id);
            snapshot.invalidate();
        }))?;
        Ok(())
    }

    fn write(&self, tx: &mut dyn Transaction, relation: &EndpointRelation) -> FlotillaResult<()> {
        tx.put_json(
            Table::EndpointRelations,
            &relation_key(relation.endpoint_id),
            relation,
        )?;
        self.invalidate_on_commit(tx, relation.endpoint_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MokaRelationCache, NoopRelationCache};
    use crate::config::EngineConfig;
    use flotilla_persistence::MemoryStore;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Records counter writes instead of touching a stack store
    #[derive(Default)]
    struct RecordingCounter {
        counts: Mutex<HashMap<EdgeStackId, i64>>,
    }

    impl StackCounterUpdater for RecordingCounter {
        fn adjust_deployments(
            &self,
            _tx: &mut dyn Transaction,
            stack_id: EdgeStackId,
            delta: i64,
        ) -> FlotillaResult<()> {
            *self.counts.lock().entry(stack_id).or_default() += delta;
            Ok(())
        }

        fn set_deployments(
            &self,
            _tx: &mut dyn Transaction,
            stack_id: EdgeStackId,
            count: u32,
        ) -> FlotillaResult<()> {
            self.counts.lock().insert(stack_id, count as i64);
            Ok(())
        }
    }

    fn setup() -> (MemoryStore, Arc<RecordingCounter>, EndpointRelationStore) {
        let counter = Arc::new(RecordingCounter::default());
        let relations = EndpointRelationStore::new(counter.clone(), Arc::new(NoopRelationCache));
        (MemoryStore::new(), counter, relations)
    }

    fn count(counter: &RecordingCounter, stack: u32) -> i64 {
        counter
            .counts
            .lock()
            .get(&EdgeStackId::new(stack))
            .copied()
            .unwrap_or(0)
    }

    #[test]
    fn test_add_and_remove_adjust_counter() {
        let (store, counter, relations) = setup();
        let envs = [EnvironmentId::new(1), EnvironmentId::new(2)];
        let stack = EdgeStackId::new(10);

        store
            .update(|tx| {
                for env in envs {
                    relations.create(tx, &EndpointRelation::new(env))?;
                }
                relations.add_relations_for_stack(tx, &envs, stack)
            })
            .unwrap();
        assert_eq!(count(&counter, 10), 2);

        store
            .update(|tx| relations.remove_relations_for_stack(tx, &envs[..1], stack))
            .unwrap();
        assert_eq!(count(&counter, 10), 1);

        let remaining = store
            .view(|tx| relations.get(tx, EnvironmentId::new(1)))
            .unwrap();
        assert!(!remaining.edge_stacks.contains_key(&stack));
    }

    #[test]
    fn test_add_to_missing_relation_is_not_found() {
        let (store, _, relations) = setup();
        let err = store
            .update(|tx| {
                relations.add_relations_for_stack(tx, &[EnvironmentId::new(5)], EdgeStackId::new(1))
            })
            .unwrap_err();
        assert!(matches!(err, FlotillaError::NotFound { .. }));
    }

    #[test]
    fn test_direct_update_recounts_changed_stacks_only() {
        let (store, counter, relations) = setup();

        store
            .update(|tx| {
                let mut first = EndpointRelation::new(EnvironmentId::new(1));
                first.edge_stacks.insert(EdgeStackId::new(1), true);
                first.edge_stacks.insert(EdgeStackId::new(2), true);
                relations.create(tx, &first)?;

                let mut second = EndpointRelation::new(EnvironmentId::new(2));
                second.edge_stacks.insert(EdgeStackId::new(1), true);
                relations.create(tx, &second)
            })
            .unwrap();
        assert_eq!(count(&counter, 1), 2);
        assert_eq!(count(&counter, 2), 1);

        // Stack 2 dropped, stack 3 added: stack 1 is untouched
        counter.counts.lock().insert(EdgeStackId::new(1), 99);
        store
            .update(|tx| {
                let mut next = EndpointRelation::new(EnvironmentId::new(1));
                next.edge_stacks.insert(EdgeStackId::new(1), true);
                next.edge_stacks.insert(EdgeStackId::new(3), true);
                relations.update(tx, EnvironmentId::new(1), &next)
            })
            .unwrap();
        assert_eq!(count(&counter, 1), 99);
        assert_eq!(count(&counter, 2), 0);
        assert_eq!(count(&counter, 3), 1);
    }

    #[test]
    fn test_delete_recounts_targeted_stacks() {
        let (store, counter, relations) = setup();
        store
            .update(|tx| {
                let mut relation = EndpointRelation::new(EnvironmentId::new(1));
                relation.edge_stacks.insert(EdgeStackId::new(4), true);
                relations.create(tx, &relation)?;
                relations.delete(tx, EnvironmentId::new(1))
            })
            .unwrap();
        assert_eq!(count(&counter, 4), 0);

        let missing = store
            .view(|tx| relations.find(tx, EnvironmentId::new(1)))
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_create_twice_conflicts() {
        let (store, _, relations) = setup();
        let relation = EndpointRelation::new(EnvironmentId::new(1));
        let err = store
            .update(|tx| {
                relations.create(tx, &relation)?;
                relations.create(tx, &relation)
            })
            .unwrap_err();
        assert!(matches!(err, FlotillaError::Conflict(_)));
    }

    #[test]
    fn test_list_cached_is_dropped_on_write() {
        let (store, _, relations) = setup();
        store
            .update(|tx| relations.create(tx, &EndpointRelation::new(EnvironmentId::new(1))))
            .unwrap();
        assert_eq!(relations.list_cached(&store).unwrap().len(), 1);

        store
            .update(|tx| relations.create(tx, &EndpointRelation::new(EnvironmentId::new(2))))
            .unwrap();
        assert_eq!(relations.list_cached(&store).unwrap().len(), 2);
    }

    #[test]
    fn test_cache_refreshed_when_fill_races_commit() {
        let counter = Arc::new(RecordingCounter::default());
        let relations = EndpointRelationStore::new(
            counter,
            Arc::new(MokaRelationCache::new(&EngineConfig::default())),
        );
        let store = MemoryStore::new();
        let env = EnvironmentId::new(1);
        store
            .update(|tx| relations.create(tx, &EndpointRelation::new(env)))
            .unwrap();

        // A writer stages a new target while an agent polls through the cache
        let mut tx = store.begin_write().unwrap();
        let mut next = EndpointRelation::new(env);
        next.edge_stacks.insert(EdgeStackId::new(7), true);
        relations.update(&mut *tx, env, &next).unwrap();

        let polled = relations.cached(&store, env).unwrap();
        assert!(!polled.targets(EdgeStackId::new(7)));

        tx.commit().unwrap();

        let polled = relations.cached(&store, env).unwrap();
        assert!(polled.targets(EdgeStackId::new(7)));
        assert_eq!(relations.list_cached(&store).unwrap().len(), 1);
    }

    #[test]
    fn test_discarded_write_keeps_committed_relation_cached() {
        let counter = Arc::new(RecordingCounter::default());
        let relations = EndpointRelationStore::new(
            counter,
            Arc::new(MokaRelationCache::new(&EngineConfig::default())),
        );
        let store = MemoryStore::new();
        let env = EnvironmentId::new(1);
        store
            .update(|tx| relations.create(tx, &EndpointRelation::new(env)))
            .unwrap();

        let err = store
            .update(|tx| {
                let mut next = EndpointRelation::new(env);
                next.edge_stacks.insert(EdgeStackId::new(3), true);
                relations.update(tx, env, &next)?;
                Err::<(), _>(FlotillaError::invalid_input("rejected"))
            })
            .unwrap_err();
        assert!(matches!(err, FlotillaError::InvalidInput(_)));

        assert!(relations.cached(&store, env).unwrap().edge_stacks.is_empty());
    }
}
