//! Common test utilities for engine integration tests
//!
//! - `TestFleet`: an engine over the in-memory store with manifests in a temp dir
//! - helpers to register environments, groups and stacks
//! - `assert_fleet_consistent`: the relation/counter/status invariants

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use tempfile::TempDir;

use flotilla_common::{EdgeGroupId, EdgeStackId, EnvironmentId, TagId};
use flotilla_edge::{
    CreateEdgeGroupRequest, CreateStackRequest, DeploymentType, EdgeEngine, EdgeStackView,
    Environment, EnvironmentType, FsManifestStorage, RegisterEnvironmentRequest, StatusReport,
    StatusType,
};
use flotilla_persistence::{KvStore, MemoryStore};

pub const COMPOSE: &str = "services:\n  web:\n    image: nginx:1.27\n";

pub struct TestFleet {
    pub engine: EdgeEngine,
    pub manifest_dir: TempDir,
}

impl TestFleet {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn KvStore>) -> Self {
        let manifest_dir = tempfile::tempdir().unwrap();
        let manifests = Arc::new(FsManifestStorage::new(manifest_dir.path()));
        let engine = EdgeEngine::builder(store, manifests).build().unwrap();
        Self {
            engine,
            manifest_dir,
        }
    }

    /// Edge agent on Docker with identity `agent-{name}`
    pub fn edge_env(&self, name: &str, tags: &[u32]) -> Environment {
        self.env(name, EnvironmentType::EdgeAgentOnDocker, tags)
    }

    pub fn env(&self, name: &str, environment_type: EnvironmentType, tags: &[u32]) -> Environment {
        self.engine
            .register_environment(RegisterEnvironmentRequest {
                name: name.to_string(),
                environment_type,
                group_id: None,
                tag_ids: tags.iter().copied().map(TagId::new).collect(),
                edge_id: Some(agent(name)),
            })
            .unwrap()
    }

    pub fn static_group(&self, name: &str, members: &[&Environment]) -> EdgeGroupId {
        self.engine
            .create_edge_group(CreateEdgeGroupRequest {
                name: name.to_string(),
                endpoints: members.iter().map(|e| e.id).collect(),
                ..Default::default()
            })
            .unwrap()
            .id
    }

    pub fn dynamic_group(&self, name: &str, tags: &[u32], partial_match: bool) -> EdgeGroupId {
        self.engine
            .create_edge_group(CreateEdgeGroupRequest {
                name: name.to_string(),
                dynamic: true,
                tag_ids: tags.iter().copied().map(TagId::new).collect(),
                partial_match,
                ..Default::default()
            })
            .unwrap()
            .id
    }

    pub fn compose_stack(&self, name: &str, groups: &[EdgeGroupId]) -> EdgeStackView {
        self.engine
            .create_stack(CreateStackRequest::new(
                name,
                DeploymentType::Compose,
                groups.to_vec(),
                COMPOSE,
            ))
            .unwrap()
    }

    /// Report `status_type` for `env` as its own agent
    pub fn report(
        &self,
        stack_id: EdgeStackId,
        env: &Environment,
        status_type: StatusType,
        version: u32,
    ) -> flotilla_common::FlotillaResult<Option<EdgeStackView>> {
        let error = (status_type == StatusType::Error).then(|| "deploy failed".to_string());
        self.engine.report_status(
            &StatusReport {
                stack_id,
                endpoint_id: env.id,
                status_type,
                error,
                time: None,
                version,
                deployment_info: None,
            },
            &agent(&env.name),
            false,
        )
    }
}

pub fn agent(name: &str) -> String {
    format!("agent-{}", name)
}

pub fn ids(envs: &[&Environment]) -> BTreeSet<EnvironmentId> {
    envs.iter().map(|e| e.id).collect()
}

/// Check every committed-state invariant of the fleet
///
/// - each stack's `num_deployments` equals the number of relations flagging it
/// - each stack's relations are exactly its related environments
/// - each related environment has a status record and nothing else does
/// - every relation belongs to a registered environment
pub fn assert_fleet_consistent(engine: &EdgeEngine) {
    let relations = engine.relations().unwrap();
    let environments: BTreeSet<EnvironmentId> = engine
        .list_environments()
        .unwrap()
        .iter()
        .map(|e| e.id)
        .collect();

    for relation in relations.iter() {
        assert!(
            environments.contains(&relation.endpoint_id),
            "relation for unknown environment {}",
            relation.endpoint_id
        );
    }

    for view in engine.list_stacks().unwrap() {
        let stack = &view.stack;
        let flagged: BTreeSet<EnvironmentId> = relations
            .iter()
            .filter(|r| r.targets(stack.id))
            .map(|r| r.endpoint_id)
            .collect();
        assert_eq!(
            stack.num_deployments as usize,
            flagged.len(),
            "deployment count of stack {}",
            stack.id
        );

        let mut related = BTreeSet::new();
        for group in &stack.edge_groups {
            related.extend(engine.edge_group_environments(*group).unwrap());
        }
        assert_eq!(flagged, related, "relations of stack {}", stack.id);

        let with_status: BTreeSet<EnvironmentId> =
            view.statuses.iter().map(|s| s.endpoint_id).collect();
        assert_eq!(with_status, related, "status records of stack {}", stack.id);
    }
}
