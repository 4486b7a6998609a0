//! Read caches for endpoint relations
//!
//! Agents poll for the stacks targeting their environment far more often than
//! relations change, so relation reads go through a per-environment cache.
//! Every relation mutation invalidates the environment's entry. Neither cache
//! is consulted on a write path.

use std::sync::Arc;

use moka::sync::Cache;
use parking_lot::Mutex;

use flotilla_common::EnvironmentId;

use crate::config::EngineConfig;
use crate::model::EndpointRelation;

/// Per-environment relation cache
pub trait RelationCache: Send + Sync {
    fn get(&self, environment_id: EnvironmentId) -> Option<EndpointRelation>;

    fn insert(&self, relation: EndpointRelation);

    /// Drop the cached relation of `environment_id`
    fn invalidate(&self, environment_id: EnvironmentId);
}

/// moka-backed relation cache with bounded capacity and TTL
pub struct MokaRelationCache {
    cache: Cache<EnvironmentId, EndpointRelation>,
}

impl MokaRelationCache {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(config.relation_cache_capacity)
                .time_to_live(config.relation_cache_ttl())
                .build(),
        }
    }
}

impl RelationCache for MokaRelationCache {
    fn get(&self, environment_id: EnvironmentId) -> Option<EndpointRelation> {
        self.cache.get(&environment_id)
    }

    fn insert(&self, relation: EndpointRelation) {
        self.cache.insert(relation.endpoint_id, relation);
    }

    fn invalidate(&self, environment_id: EnvironmentId) {
        self.cache.invalidate(&environment_id);
    }
}

/// Cache that never holds anything
#[derive(Default)]
pub struct NoopRelationCache;

impl RelationCache for NoopRelationCache {
    fn get(&self, _environment_id: EnvironmentId) -> Option<EndpointRelation> {
        None
    }

    fn insert(&self, _relation: EndpointRelation) {}

    fn invalidate(&self, _environment_id: EnvironmentId) {}
}

/// Best-effort snapshot of every relation, dropped on any relation mutation
#[derive(Default)]
pub struct RelationSnapshot {
    relations: Mutex<Option<Arc<Vec<EndpointRelation>>>>,
}

impl RelationSnapshot {
    pub fn get(&self) -> Option<Arc<Vec<EndpointRelation>>> {
        self.relations.lock().clone()
    }

    pub fn set(&self, relations: Vec<EndpointRelation>) -> Arc<Vec<EndpointRelation>> {
        let relations = Arc::new(relations);
        *self.relations.lock() = Some(relations.clone());
        relations
    }

    pub fn invalidate(&self) {
        self.relations.lock().take();
    }
}
