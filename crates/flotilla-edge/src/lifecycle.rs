//! Edge stack lifecycle
//!
//! A stack is built (validated, ID allocated, not yet stored), persisted
//! (content stored, relations and status records written), updated any number
//! of times and finally deleted. Every step runs inside the caller's write
//! transaction so relation and counter maintenance commit together with the
//! stack record.

use std::collections::BTreeSet;
use std::sync::Arc;

use md5::{Digest, Md5};
use tracing::{info, warn};

use flotilla_common::{
    DEFAULT_COMPOSE_FILE, DEFAULT_MANIFEST_FILE, EdgeGroupId, EdgeStackId, EnvironmentId,
    FlotillaError, FlotillaResult, ManifestStorage, is_valid_stack_name,
};
use flotilla_persistence::Transaction;

use crate::config::EngineConfig;
use crate::environment::EnvironmentStore;
use crate::group::EdgeGroupStore;
use crate::membership::{edge_group_contains, related_endpoints};
use crate::model::{DeploymentType, EdgeGroup, EdgeStack, Environment, EnvironmentGroup};
use crate::relation::EndpointRelationStore;
use crate::stack_store::EdgeStackStore;
use crate::status::EdgeStackStatusStore;

/// Environments and groups as seen by one transaction
#[derive(Clone, Debug, Default)]
pub struct FleetSnapshot {
    pub environments: Vec<Environment>,
    pub environment_groups: Vec<EnvironmentGroup>,
    pub edge_groups: Vec<EdgeGroup>,
}

impl FleetSnapshot {
    pub fn load(tx: &dyn Transaction) -> FlotillaResult<Self> {
        Ok(Self {
            environments: EnvironmentStore.list(tx)?,
            environment_groups: EnvironmentStore.list_groups(tx)?,
            edge_groups: EdgeGroupStore.list(tx)?,
        })
    }

    /// Copy of this snapshot with `group` replacing the stored group of the same ID
    pub fn with_edge_group(&self, group: EdgeGroup) -> Self {
        let mut next = self.clone();
        match next.edge_groups.iter_mut().find(|g| g.id == group.id) {
            Some(existing) => *existing = group,
            None => next.edge_groups.push(group),
        }
        next
    }

    pub fn environment(&self, id: EnvironmentId) -> Option<&Environment> {
        self.environments.iter().find(|env| env.id == id)
    }

    /// Registered environments selected by any of `edge_group_ids`
    ///
    /// Static members that are not registered environments are skipped.
    pub fn related_environments(&self, edge_group_ids: &[EdgeGroupId]) -> BTreeSet<EnvironmentId> {
        let mut related = BTreeSet::new();
        for id in related_endpoints(
            edge_group_ids,
            &self.environments,
            &self.environment_groups,
            &self.edge_groups,
        ) {
            if self.environment(id).is_some() {
                related.insert(id);
            } else {
                warn!(environment_id = %id, "Skipping unknown environment listed by edge group");
            }
        }
        related
    }

    /// Whether any of `edge_group_ids` selects `environment`
    pub fn selects(&self, edge_group_ids: &[EdgeGroupId], environment: &Environment) -> bool {
        edge_group_ids
            .iter()
            .filter_map(|id| self.edge_groups.iter().find(|g| g.id == *id))
            .any(|group| edge_group_contains(group, environment, &self.environment_groups))
    }

    /// Reject environments that cannot run `deployment_type`
    pub fn check_deployment_type(
        &self,
        deployment_type: DeploymentType,
        environment_ids: &BTreeSet<EnvironmentId>,
    ) -> FlotillaResult<()> {
        for id in environment_ids {
            let Some(environment) = self.environment(*id) else {
                continue;
            };
            if !deployment_type.supports(environment.environment_type) {
                return Err(FlotillaError::invalid_input(format!(
                    "environment '{}' cannot run {} stacks",
                    environment.name, deployment_type
                )));
            }
        }
        Ok(())
    }
}

/// Where a stack's content was stored
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestLocation {
    pub project_path: String,
    pub entry_point: Option<String>,
    pub manifest_path: Option<String>,
    pub config_hash: String,
}

impl ManifestLocation {
    fn apply_to(self, stack: &mut EdgeStack) {
        stack.project_path = self.project_path;
        stack.entry_point = self.entry_point;
        stack.manifest_path = self.manifest_path;
        stack.config_hash = self.config_hash;
    }
}

/// Hex MD5 of manifest content
pub fn config_hash(content: &[u8]) -> String {
    const_hex::encode(Md5::digest(content))
}

/// Store `content` in the project `folder`
///
/// Compose stacks are written as their entry point, Kubernetes stacks as
/// their manifest.
pub fn write_manifest(
    manifests: &dyn ManifestStorage,
    folder: &str,
    deployment_type: DeploymentType,
    content: &[u8],
) -> FlotillaResult<ManifestLocation> {
    let file_name = match deployment_type {
        DeploymentType::Compose => DEFAULT_COMPOSE_FILE,
        DeploymentType::Kubernetes => DEFAULT_MANIFEST_FILE,
    };
    manifests.store_manifest(folder, file_name, content)?;

    let (entry_point, manifest_path) = match deployment_type {
        DeploymentType::Compose => (Some(file_name.to_string()), None),
        DeploymentType::Kubernetes => (None, Some(file_name.to_string())),
    };
    Ok(ManifestLocation {
        project_path: manifests.project_path(folder),
        entry_point,
        manifest_path,
        config_hash: config_hash(content),
    })
}

/// File left behind when an update switched the stack's deployment type
///
/// Only safe to remove once the update has committed.
pub fn replaced_manifest<'a>(before: &'a EdgeStack, after: &EdgeStack) -> Option<&'a str> {
    if before.deployment_type == after.deployment_type {
        return None;
    }
    before
        .entry_point
        .as_deref()
        .or(before.manifest_path.as_deref())
}

/// Input of [`StackLifecycleManager::build`]
#[derive(Clone, Debug)]
pub struct BuildStackRequest {
    pub name: String,
    pub deployment_type: DeploymentType,
    pub edge_groups: Vec<EdgeGroupId>,
    pub registries: Vec<u32>,
    pub use_manifest_namespaces: bool,
    pub pre_pull_image: bool,
    pub re_pull_image: bool,
    pub retry_deploy: bool,
}

/// Input of [`StackLifecycleManager::update`]; `None` keeps the field
#[derive(Clone, Debug, Default)]
pub struct UpdateStackRequest {
    pub edge_groups: Option<Vec<EdgeGroupId>>,
    pub deployment_type: Option<DeploymentType>,
    /// Replacement manifest content
    pub content: Option<Vec<u8>>,
    /// Bump the stack version and reset every timeline
    pub update_version: bool,
    pub registries: Option<Vec<u32>>,
    pub use_manifest_namespaces: Option<bool>,
    pub pre_pull_image: Option<bool>,
    pub re_pull_image: Option<bool>,
    pub retry_deploy: Option<bool>,
}

/// Drives stacks through build, persist, update and delete
pub struct StackLifecycleManager {
    config: EngineConfig,
    relations: Arc<EndpointRelationStore>,
    groups: EdgeGroupStore,
    stacks: EdgeStackStore,
    statuses: EdgeStackStatusStore,
}

impl StackLifecycleManager {
    pub fn new(config: EngineConfig, relations: Arc<EndpointRelationStore>) -> Self {
        Self {
            config,
            relations,
            groups: EdgeGroupStore,
            stacks: EdgeStackStore,
            statuses: EdgeStackStatusStore,
        }
    }

    pub fn stacks(&self) -> &EdgeStackStore {
        &self.stacks
    }

    pub fn statuses(&self) -> &EdgeStackStatusStore {
        &self.statuses
    }

    /// Project folder of a stack relative to the manifest root
    pub fn stack_folder(&self, stack_id: EdgeStackId) -> String {
        self.config.stack_folder(stack_id)
    }

    /// Validate a new stack and allocate its ID without storing it
    pub fn build(
        &self,
        tx: &mut dyn Transaction,
        request: BuildStackRequest,
    ) -> FlotillaResult<EdgeStack> {
        if !is_valid_stack_name(&request.name) {
            return Err(FlotillaError::invalid_input(format!(
                "invalid edge stack name '{}': use lowercase letters, digits, '-' or '_'",
                request.name
            )));
        }
        if self.stacks.name_taken(tx, &request.name)? {
            return Err(FlotillaError::conflict(format!(
                "edge stack '{}' already exists",
                request.name
            )));
        }
        self.check_edge_groups(tx, &request.edge_groups)?;

        let id = self.stacks.next_id(tx)?;
        Ok(EdgeStack {
            id,
            name: request.name,
            deployment_type: request.deployment_type,
            edge_groups: request.edge_groups,
            version: 1,
            num_deployments: 0,
            project_path: String::new(),
            entry_point: None,
            manifest_path: None,
            creation_date: chrono::Utc::now().timestamp(),
            registries: request.registries,
            use_manifest_namespaces: request.use_manifest_namespaces,
            file_version: 1,
            config_hash: String::new(),
            pre_pull_image: request.pre_pull_image,
            re_pull_image: request.re_pull_image,
            retry_deploy: request.retry_deploy,
        })
    }

    /// Store a built stack and point its related environments at it
    ///
    /// `store_manifest` receives the stack's project folder and its related
    /// environments and returns where the content was written.
    pub fn persist<F>(
        &self,
        tx: &mut dyn Transaction,
        mut stack: EdgeStack,
        store_manifest: F,
    ) -> FlotillaResult<EdgeStack>
    where
        F: FnOnce(&str, &[EnvironmentId]) -> FlotillaResult<ManifestLocation>,
    {
        let snapshot = FleetSnapshot::load(tx)?;
        let related = snapshot.related_environments(&stack.edge_groups);
        snapshot.check_deployment_type(stack.deployment_type, &related)?;
        let related: Vec<EnvironmentId> = related.into_iter().collect();

        let folder = self.stack_folder(stack.id);
        store_manifest(&folder, &related)?.apply_to(&mut stack);

        stack.num_deployments = 0;
        self.stacks.put(tx, &stack)?;

        for environment_id in &related {
            self.statuses.create(tx, stack.id, *environment_id)?;
        }
        self.relations.add_relations_for_stack(tx, &related, stack.id)?;

        // Second pass through the recount path
        for environment_id in &related {
            let mut relation = self.relations.get(tx, *environment_id)?;
            relation.edge_stacks.insert(stack.id, true);
            self.relations.update(tx, *environment_id, &relation)?;
        }

        let stack = self.stacks.get(tx, stack.id)?;
        info!(
            stack_id = %stack.id,
            name = %stack.name,
            deployments = stack.num_deployments,
            "Persisted edge stack"
        );
        Ok(stack)
    }

    /// Apply `request` to a stored stack
    pub fn update(
        &self,
        tx: &mut dyn Transaction,
        stack_id: EdgeStackId,
        request: UpdateStackRequest,
        manifests: &dyn ManifestStorage,
    ) -> FlotillaResult<EdgeStack> {
        let current = self.stacks.get(tx, stack_id)?;

        let new_groups = request
            .edge_groups
            .clone()
            .unwrap_or_else(|| current.edge_groups.clone());
        self.check_edge_groups(tx, &new_groups)?;

        let new_type = request.deployment_type.unwrap_or(current.deployment_type);
        let type_changed = new_type != current.deployment_type;
        if type_changed && request.content.is_none() {
            return Err(FlotillaError::invalid_input(
                "changing the deployment type requires new stack content",
            ));
        }

        let snapshot = FleetSnapshot::load(tx)?;
        let old_related = snapshot.related_environments(&current.edge_groups);
        let new_related = snapshot.related_environments(&new_groups);
        snapshot.check_deployment_type(new_type, &new_related)?;

        if new_groups != current.edge_groups {
            let removed: Vec<EnvironmentId> =
                old_related.difference(&new_related).copied().collect();
            let added: Vec<EnvironmentId> =
                new_related.difference(&old_related).copied().collect();

            self.relations
                .remove_relations_for_stack(tx, &removed, stack_id)?;
            for environment_id in &removed {
                self.statuses.delete(tx, stack_id, *environment_id)?;
            }
            self.relations.add_relations_for_stack(tx, &added, stack_id)?;
            for environment_id in &added {
                self.statuses.create(tx, stack_id, *environment_id)?;
            }
        }

        // Counter maintenance above rewrote the record
        let mut stack = self.stacks.get(tx, stack_id)?;
        stack.edge_groups = new_groups;
        stack.num_deployments = new_related.len() as u32;

        if let Some(content) = &request.content {
            let folder = self.stack_folder(stack_id);
            if type_changed {
                stack.entry_point = None;
                stack.manifest_path = None;
                stack.deployment_type = new_type;
            }
            write_manifest(manifests, &folder, stack.deployment_type, content)?
                .apply_to(&mut stack);
            stack.file_version += 1;
        }

        if request.update_version {
            stack.version += 1;
            let related: Vec<EnvironmentId> = new_related.iter().copied().collect();
            self.statuses.clear(tx, stack_id, &related)?;
        }

        if let Some(registries) = request.registries {
            stack.registries = registries;
        }
        if let Some(value) = request.use_manifest_namespaces {
            stack.use_manifest_namespaces = value;
        }
        if let Some(value) = request.pre_pull_image {
            stack.pre_pull_image = value;
        }
        if let Some(value) = request.re_pull_image {
            stack.re_pull_image = value;
        }
        if let Some(value) = request.retry_deploy {
            stack.retry_deploy = value;
        }

        self.stacks.put(tx, &stack)?;
        info!(
            stack_id = %stack.id,
            version = stack.version,
            file_version = stack.file_version,
            deployments = stack.num_deployments,
            "Updated edge stack"
        );
        Ok(stack)
    }

    /// Bump the version and reset every related timeline
    pub fn redeploy(&self, tx: &mut dyn Transaction, stack_id: EdgeStackId) -> FlotillaResult<EdgeStack> {
        let stack = self.stacks.update_with(tx, stack_id, |stack| stack.version += 1)?;

        let snapshot = FleetSnapshot::load(tx)?;
        let related: Vec<EnvironmentId> = snapshot
            .related_environments(&stack.edge_groups)
            .into_iter()
            .collect();
        self.statuses.clear(tx, stack_id, &related)?;

        info!(stack_id = %stack_id, version = stack.version, "Redeploying edge stack");
        Ok(stack)
    }

    /// Remove a stack, its relations and its status records
    ///
    /// Relations are resolved from `related_edge_group_ids`, normally the
    /// stack's own groups.
    pub fn delete(
        &self,
        tx: &mut dyn Transaction,
        stack_id: EdgeStackId,
        related_edge_group_ids: &[EdgeGroupId],
    ) -> FlotillaResult<EdgeStack> {
        let stack = self.stacks.get(tx, stack_id)?;

        let snapshot = FleetSnapshot::load(tx)?;
        let related: Vec<EnvironmentId> = snapshot
            .related_environments(related_edge_group_ids)
            .into_iter()
            .collect();

        self.relations
            .remove_relations_for_stack(tx, &related, stack_id)?;
        self.stacks.delete(tx, stack_id)?;
        self.statuses.delete_all(tx, stack_id)?;

        info!(stack_id = %stack_id, name = %stack.name, "Deleted edge stack");
        Ok(stack)
    }

    fn check_edge_groups(&self, tx: &dyn Transaction, edge_groups: &[EdgeGroupId]) -> FlotillaResult<()> {
        if edge_groups.is_empty() {
            return Err(FlotillaError::invalid_input(
                "edge stack must target at least one edge group",
            ));
        }
        for id in edge_groups {
            self.groups.get(tx, *id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_hash_is_hex_md5() {
        assert_eq!(config_hash(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(config_hash(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }
}
