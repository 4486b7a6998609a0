//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use flotilla_common::EDGE_STACK_FOLDER;

const DEFAULT_RELATION_CACHE_CAPACITY: u64 = 10_000;
const DEFAULT_RELATION_CACHE_TTL_SECS: u64 = 300;

/// Tunables of the edge engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    /// Maximum number of cached endpoint relations
    pub relation_cache_capacity: u64,
    /// Time-to-live of a cached endpoint relation, in seconds
    pub relation_cache_ttl_secs: u64,
    /// Folder, relative to the manifest root, holding stack projects
    pub edge_stack_folder: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relation_cache_capacity: DEFAULT_RELATION_CACHE_CAPACITY,
            relation_cache_ttl_secs: DEFAULT_RELATION_CACHE_TTL_SECS,
            edge_stack_folder: EDGE_STACK_FOLDER.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn relation_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.relation_cache_ttl_secs)
    }

    /// Project folder of a stack, relative to the manifest root
    pub fn stack_folder(&self, stack_id: flotilla_common::EdgeStackId) -> String {
        format!("{}/{}", self.edge_stack_folder, stack_id)
    }
}
