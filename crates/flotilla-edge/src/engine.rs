//! Engine facade
//!
//! Every method opens one transaction on the store and delegates to the
//! component that owns the operation.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use flotilla_common::{
    EdgeGroupId, EdgeStackId, EnvironmentGroupId, EnvironmentId, FlotillaResult, ManifestStorage,
    TagId,
};
use flotilla_persistence::{KvStore, StoreExt, Transaction};

use crate::cache::{MokaRelationCache, RelationCache};
use crate::config::EngineConfig;
use crate::environment::{EnvironmentService, RegisterEnvironmentRequest, UpdateEnvironmentRequest};
use crate::group::{CreateEdgeGroupRequest, EdgeGroupService, UpdateEdgeGroupRequest};
use crate::lifecycle::{
    BuildStackRequest, FleetSnapshot, StackLifecycleManager, UpdateStackRequest, replaced_manifest,
    write_manifest,
};
use crate::model::{
    DeploymentType, EdgeGroup, EdgeStack, EdgeStackStatus, EndpointRelation, Environment,
    EnvironmentGroup,
};
use crate::relation::EndpointRelationStore;
use crate::report::{AgentAuthorizer, EdgeIdAuthorizer, StatusReport, StatusReportHandler};
use crate::stack_store::EdgeStackStore;
use crate::summary::{FleetSummary, summarize};

/// Input of [`EdgeEngine::create_stack`]
#[derive(Clone, Debug)]
pub struct CreateStackRequest {
    pub name: String,
    pub deployment_type: DeploymentType,
    pub edge_groups: Vec<EdgeGroupId>,
    pub content: Vec<u8>,
    pub registries: Vec<u32>,
    pub use_manifest_namespaces: bool,
    pub pre_pull_image: bool,
    pub re_pull_image: bool,
    pub retry_deploy: bool,
}

impl CreateStackRequest {
    pub fn new(
        name: impl Into<String>,
        deployment_type: DeploymentType,
        edge_groups: Vec<EdgeGroupId>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            deployment_type,
            edge_groups,
            content: content.into(),
            registries: vec![],
            use_manifest_namespaces: false,
            pre_pull_image: false,
            re_pull_image: false,
            retry_deploy: false,
        }
    }
}

/// A stack with its per-environment statuses and fleet verdict
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeStackView {
    #[serde(flatten)]
    pub stack: EdgeStack,
    pub statuses: Vec<EdgeStackStatus>,
    pub summary: FleetSummary,
}

/// Builder for [`EdgeEngine`]
pub struct EdgeEngineBuilder {
    store: Arc<dyn KvStore>,
    manifests: Arc<dyn ManifestStorage>,
    cache: Option<Arc<dyn RelationCache>>,
    authorizer: Option<Arc<dyn AgentAuthorizer>>,
    config: EngineConfig,
}

impl EdgeEngineBuilder {
    pub fn cache(mut self, cache: Arc<dyn RelationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn AgentAuthorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Wire the components and make sure the default environment group exists
    pub fn build(self) -> FlotillaResult<EdgeEngine> {
        let cache: Arc<dyn RelationCache> = match self.cache {
            Some(cache) => cache,
            None => Arc::new(MokaRelationCache::new(&self.config)),
        };
        let authorizer: Arc<dyn AgentAuthorizer> = match self.authorizer {
            Some(authorizer) => authorizer,
            None => Arc::new(EdgeIdAuthorizer),
        };

        let relations = Arc::new(EndpointRelationStore::new(Arc::new(EdgeStackStore), cache));
        let engine = EdgeEngine {
            lifecycle: StackLifecycleManager::new(self.config.clone(), relations.clone()),
            groups: EdgeGroupService::new(relations.clone()),
            environments: EnvironmentService::new(relations.clone()),
            reports: StatusReportHandler::new(authorizer),
            relations,
            store: self.store,
            manifests: self.manifests,
            config: self.config,
        };

        engine.write(|tx| engine.environments.ensure_default_environment_group(tx))?;
        info!(storage = %engine.store.storage_mode(), "Edge engine ready");
        Ok(engine)
    }
}

/// Edge stack deployment and fleet-status engine
pub struct EdgeEngine {
    store: Arc<dyn KvStore>,
    manifests: Arc<dyn ManifestStorage>,
    relations: Arc<EndpointRelationStore>,
    lifecycle: StackLifecycleManager,
    groups: EdgeGroupService,
    environments: EnvironmentService,
    reports: StatusReportHandler,
    config: EngineConfig,
}

impl EdgeEngine {
    pub fn builder(store: Arc<dyn KvStore>, manifests: Arc<dyn ManifestStorage>) -> EdgeEngineBuilder {
        EdgeEngineBuilder {
            store,
            manifests,
            cache: None,
            authorizer: None,
            config: EngineConfig::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }

    // Environments

    pub fn create_environment_group(
        &self,
        name: &str,
        tag_ids: Vec<TagId>,
    ) -> FlotillaResult<EnvironmentGroup> {
        self.write(|tx| self.environments.create_environment_group(tx, name, tag_ids))
    }

    pub fn update_environment_group(
        &self,
        id: EnvironmentGroupId,
        tag_ids: Vec<TagId>,
    ) -> FlotillaResult<EnvironmentGroup> {
        self.write(|tx| self.environments.update_environment_group(tx, id, tag_ids))
    }

    pub fn list_environment_groups(&self) -> FlotillaResult<Vec<EnvironmentGroup>> {
        self.store.view(|tx| self.environments.store().list_groups(tx))
    }

    pub fn register_environment(
        &self,
        request: RegisterEnvironmentRequest,
    ) -> FlotillaResult<Environment> {
        self.write(|tx| self.environments.register_environment(tx, request))
    }

    pub fn update_environment(
        &self,
        id: EnvironmentId,
        request: UpdateEnvironmentRequest,
    ) -> FlotillaResult<Environment> {
        self.write(|tx| self.environments.update_environment(tx, id, request))
    }

    pub fn remove_environment(&self, id: EnvironmentId) -> FlotillaResult<()> {
        self.write(|tx| self.environments.remove_environment(tx, id))
    }

    pub fn get_environment(&self, id: EnvironmentId) -> FlotillaResult<Environment> {
        self.store.view(|tx| self.environments.store().get(tx, id))
    }

    pub fn list_environments(&self) -> FlotillaResult<Vec<Environment>> {
        self.store.view(|tx| self.environments.store().list(tx))
    }

    // Edge groups

    pub fn create_edge_group(&self, request: CreateEdgeGroupRequest) -> FlotillaResult<EdgeGroup> {
        self.write(|tx| self.groups.create(tx, request))
    }

    pub fn update_edge_group(
        &self,
        id: EdgeGroupId,
        request: UpdateEdgeGroupRequest,
    ) -> FlotillaResult<EdgeGroup> {
        self.write(|tx| self.groups.update(tx, id, request))
    }

    pub fn delete_edge_group(&self, id: EdgeGroupId) -> FlotillaResult<()> {
        self.write(|tx| self.groups.delete(tx, id))
    }

    pub fn get_edge_group(&self, id: EdgeGroupId) -> FlotillaResult<EdgeGroup> {
        self.store.view(|tx| self.groups.get(tx, id))
    }

    pub fn list_edge_groups(&self) -> FlotillaResult<Vec<EdgeGroup>> {
        self.store.view(|tx| self.groups.list(tx))
    }

    /// Registered environments a group currently selects
    pub fn edge_group_environments(&self, id: EdgeGroupId) -> FlotillaResult<BTreeSet<EnvironmentId>> {
        self.store.view(|tx| {
            self.groups.get(tx, id)?;
            Ok(FleetSnapshot::load(tx)?.related_environments(&[id]))
        })
    }

    // Stacks

    /// Build and persist a stack, storing `content` as its manifest
    pub fn create_stack(&self, request: CreateStackRequest) -> FlotillaResult<EdgeStackView> {
        let manifests = self.manifests.as_ref();
        let stack = self.write(|tx| {
            let stack = self.lifecycle.build(
                tx,
                BuildStackRequest {
                    name: request.name,
                    deployment_type: request.deployment_type,
                    edge_groups: request.edge_groups,
                    registries: request.registries,
                    use_manifest_namespaces: request.use_manifest_namespaces,
                    pre_pull_image: request.pre_pull_image,
                    re_pull_image: request.re_pull_image,
                    retry_deploy: request.retry_deploy,
                },
            )?;
            let deployment_type = stack.deployment_type;
            let content = request.content;
            self.lifecycle.persist(tx, stack, |folder, _related| {
                write_manifest(manifests, folder, deployment_type, &content)
            })
        })?;
        self.get_stack(stack.id)
    }

    pub fn update_stack(
        &self,
        id: EdgeStackId,
        request: UpdateStackRequest,
    ) -> FlotillaResult<EdgeStackView> {
        let (before, after) = self.write(|tx| {
            let before = self.lifecycle.stacks().get(tx, id)?;
            let after = self
                .lifecycle
                .update(tx, id, request, self.manifests.as_ref())?;
            Ok((before, after))
        })?;

        if let Some(file_name) = replaced_manifest(&before, &after) {
            let folder = self.lifecycle.stack_folder(id);
            if let Err(e) = self.manifests.remove_manifest(&folder, file_name) {
                warn!(stack_id = %id, error = %e, "Failed to remove replaced manifest");
            }
        }
        self.get_stack(id)
    }

    pub fn redeploy_stack(&self, id: EdgeStackId) -> FlotillaResult<EdgeStackView> {
        self.write(|tx| self.lifecycle.redeploy(tx, id))?;
        self.get_stack(id)
    }

    /// Delete a stack and, once committed, its project directory
    pub fn delete_stack(&self, id: EdgeStackId) -> FlotillaResult<()> {
        let stack = self.write(|tx| {
            let stack = self.lifecycle.stacks().get(tx, id)?;
            self.lifecycle.delete(tx, id, &stack.edge_groups)
        })?;

        if let Err(e) = self
            .manifests
            .remove_directory(&self.lifecycle.stack_folder(stack.id))
        {
            warn!(stack_id = %stack.id, error = %e, "Failed to remove edge stack project directory");
        }
        Ok(())
    }

    pub fn get_stack(&self, id: EdgeStackId) -> FlotillaResult<EdgeStackView> {
        self.store.view(|tx| {
            let stack = self.lifecycle.stacks().get(tx, id)?;
            self.view_of(tx, stack)
        })
    }

    pub fn list_stacks(&self) -> FlotillaResult<Vec<EdgeStackView>> {
        self.store.view(|tx| {
            self.lifecycle
                .stacks()
                .list(tx)?
                .into_iter()
                .map(|stack| self.view_of(tx, stack))
                .collect()
        })
    }

    /// Per-environment statuses of one stack
    pub fn stack_status(&self, id: EdgeStackId) -> FlotillaResult<Vec<EdgeStackStatus>> {
        self.store.view(|tx| {
            self.lifecycle.stacks().get(tx, id)?;
            self.lifecycle.statuses().read_all(tx, id)
        })
    }

    // Agents

    /// Apply an agent report; returns the refreshed stack unless `no_body`
    pub fn report_status(
        &self,
        report: &StatusReport,
        agent_identity: &str,
        no_body: bool,
    ) -> FlotillaResult<Option<EdgeStackView>> {
        self.write(|tx| self.reports.apply(tx, report, agent_identity))?;
        if no_body {
            return Ok(None);
        }
        self.get_stack(report.stack_id).map(Some)
    }

    /// Relation of one environment, read through the cache
    pub fn relation(&self, environment_id: EnvironmentId) -> FlotillaResult<EndpointRelation> {
        self.relations.cached(self.store.as_ref(), environment_id)
    }

    /// Stacks an environment's agent should be running
    pub fn stacks_for_environment(
        &self,
        environment_id: EnvironmentId,
    ) -> FlotillaResult<BTreeSet<EdgeStackId>> {
        self.relations
            .stacks_for_endpoint(self.store.as_ref(), environment_id)
    }

    /// Every relation, served from the snapshot when possible
    pub fn relations(&self) -> FlotillaResult<Arc<Vec<EndpointRelation>>> {
        self.relations.list_cached(self.store.as_ref())
    }

    /// Run `f` in one write transaction
    fn write<R, F>(&self, f: F) -> FlotillaResult<R>
    where
        F: FnOnce(&mut dyn Transaction) -> FlotillaResult<R>,
    {
        self.store.update(f)
    }

    fn view_of(&self, tx: &dyn Transaction, stack: EdgeStack) -> FlotillaResult<EdgeStackView> {
        let statuses = self.lifecycle.statuses().read_all(tx, stack.id)?;
        let summary = summarize(&statuses, stack.num_deployments);
        Ok(EdgeStackView {
            stack,
            statuses,
            summary,
        })
    }
}
