//! Edge group CRUD
//!
//! Changing a group's selector changes the related environments of every
//! stack that targets it. Updates compute each affected stack's related set
//! before and after the change, check deployment-type compatibility for all
//! of them, and only then rewrite relations and status records.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use flotilla_common::{EdgeGroupId, EdgeStackId, EnvironmentId, FlotillaError, FlotillaResult, TagId};
use flotilla_persistence::{Table, Transaction, TransactionExt};

use crate::environment::EnvironmentStore;
use crate::lifecycle::FleetSnapshot;
use crate::model::EdgeGroup;
use crate::relation::EndpointRelationStore;
use crate::stack_store::EdgeStackStore;
use crate::status::EdgeStackStatusStore;

/// Keyed access to edge groups
#[derive(Clone, Copy, Debug, Default)]
pub struct EdgeGroupStore;

impl EdgeGroupStore {
    pub fn find(&self, tx: &dyn Transaction, id: EdgeGroupId) -> FlotillaResult<Option<EdgeGroup>> {
        Ok(tx.get_json(Table::EdgeGroups, &id.storage_key())?)
    }

    pub fn get(&self, tx: &dyn Transaction, id: EdgeGroupId) -> FlotillaResult<EdgeGroup> {
        self.find(tx, id)?
            .ok_or_else(|| FlotillaError::not_found("edge group", id))
    }

    pub fn list(&self, tx: &dyn Transaction) -> FlotillaResult<Vec<EdgeGroup>> {
        Ok(tx.scan_json(Table::EdgeGroups, "")?)
    }

    pub fn put(&self, tx: &mut dyn Transaction, group: &EdgeGroup) -> FlotillaResult<()> {
        tx.put_json(Table::EdgeGroups, &group.id.storage_key(), group)?;
        Ok(())
    }

    pub fn delete(&self, tx: &mut dyn Transaction, id: EdgeGroupId) -> FlotillaResult<()> {
        tx.delete(Table::EdgeGroups, &id.storage_key())?;
        Ok(())
    }

    fn next_id(&self, tx: &mut dyn Transaction) -> FlotillaResult<EdgeGroupId> {
        Ok(EdgeGroupId::new(tx.next_sequence(Table::EdgeGroups)?))
    }
}

/// Input of [`EdgeGroupService::create`]
#[derive(Clone, Debug, Default)]
pub struct CreateEdgeGroupRequest {
    pub name: String,
    pub dynamic: bool,
    pub tag_ids: Vec<TagId>,
    pub endpoints: Vec<EnvironmentId>,
    pub partial_match: bool,
}

/// Input of [`EdgeGroupService::update`]; `None` keeps the field
#[derive(Clone, Debug, Default)]
pub struct UpdateEdgeGroupRequest {
    pub name: Option<String>,
    pub dynamic: Option<bool>,
    pub tag_ids: Option<Vec<TagId>>,
    pub endpoints: Option<Vec<EnvironmentId>>,
    pub partial_match: Option<bool>,
}

struct MembershipChange {
    stack_id: EdgeStackId,
    removed: Vec<EnvironmentId>,
    added: Vec<EnvironmentId>,
}

/// Edge group CRUD with propagation to the stacks that target a group
pub struct EdgeGroupService {
    relations: Arc<EndpointRelationStore>,
    groups: EdgeGroupStore,
    stacks: EdgeStackStore,
    statuses: EdgeStackStatusStore,
}

impl EdgeGroupService {
    pub fn new(relations: Arc<EndpointRelationStore>) -> Self {
        Self {
            relations,
            groups: EdgeGroupStore,
            stacks: EdgeStackStore,
            statuses: EdgeStackStatusStore,
        }
    }

    pub fn get(&self, tx: &dyn Transaction, id: EdgeGroupId) -> FlotillaResult<EdgeGroup> {
        self.groups.get(tx, id)
    }

    pub fn list(&self, tx: &dyn Transaction) -> FlotillaResult<Vec<EdgeGroup>> {
        self.groups.list(tx)
    }

    pub fn create(
        &self,
        tx: &mut dyn Transaction,
        request: CreateEdgeGroupRequest,
    ) -> FlotillaResult<EdgeGroup> {
        let mut group = EdgeGroup {
            id: EdgeGroupId::default(),
            name: request.name,
            dynamic: request.dynamic,
            tag_ids: request.tag_ids,
            endpoints: if request.dynamic {
                vec![]
            } else {
                request.endpoints
            },
            partial_match: request.partial_match,
        };
        group.validate()?;
        self.check_name(tx, &group.name, None)?;
        self.check_endpoints(tx, &group)?;

        group.id = self.groups.next_id(tx)?;
        self.groups.put(tx, &group)?;
        info!(group_id = %group.id, name = %group.name, dynamic = group.dynamic, "Created edge group");
        Ok(group)
    }

    /// Apply `request` and move every affected stack to the new membership
    pub fn update(
        &self,
        tx: &mut dyn Transaction,
        id: EdgeGroupId,
        request: UpdateEdgeGroupRequest,
    ) -> FlotillaResult<EdgeGroup> {
        let mut group = self.groups.get(tx, id)?;
        if let Some(name) = request.name {
            self.check_name(tx, &name, Some(id))?;
            group.name = name;
        }
        if let Some(dynamic) = request.dynamic {
            group.dynamic = dynamic;
        }
        if let Some(tag_ids) = request.tag_ids {
            group.tag_ids = tag_ids;
        }
        if let Some(endpoints) = request.endpoints {
            group.endpoints = endpoints;
        }
        if let Some(partial_match) = request.partial_match {
            group.partial_match = partial_match;
        }
        if group.dynamic {
            group.endpoints.clear();
        }
        group.validate()?;
        self.check_endpoints(tx, &group)?;

        let before = FleetSnapshot::load(tx)?;
        let after = before.with_edge_group(group.clone());

        let mut changes = Vec::new();
        for stack in self.stacks.list(tx)? {
            if !stack.edge_groups.contains(&id) {
                continue;
            }
            let old = before.related_environments(&stack.edge_groups);
            let new = after.related_environments(&stack.edge_groups);
            after.check_deployment_type(stack.deployment_type, &new)?;
            changes.push(MembershipChange {
                stack_id: stack.id,
                removed: old.difference(&new).copied().collect(),
                added: new.difference(&old).copied().collect(),
            });
        }

        self.groups.put(tx, &group)?;
        for change in &changes {
            self.apply_change(tx, change)?;
        }

        info!(group_id = %group.id, stacks = changes.len(), "Updated edge group");
        Ok(group)
    }

    /// Delete a group no stack targets
    pub fn delete(&self, tx: &mut dyn Transaction, id: EdgeGroupId) -> FlotillaResult<()> {
        let group = self.groups.get(tx, id)?;
        if let Some(stack) = self
            .stacks
            .list(tx)?
            .into_iter()
            .find(|s| s.edge_groups.contains(&id))
        {
            return Err(FlotillaError::conflict(format!(
                "edge group '{}' is used by edge stack '{}'",
                group.name, stack.name
            )));
        }
        self.groups.delete(tx, id)?;
        info!(group_id = %id, name = %group.name, "Deleted edge group");
        Ok(())
    }

    fn apply_change(&self, tx: &mut dyn Transaction, change: &MembershipChange) -> FlotillaResult<()> {
        if !change.removed.is_empty() {
            self.relations
                .remove_relations_for_stack(tx, &change.removed, change.stack_id)?;
            for environment_id in &change.removed {
                self.statuses.delete(tx, change.stack_id, *environment_id)?;
            }
        }
        if !change.added.is_empty() {
            self.relations
                .add_relations_for_stack(tx, &change.added, change.stack_id)?;
            for environment_id in &change.added {
                self.statuses.create(tx, change.stack_id, *environment_id)?;
            }
        }
        Ok(())
    }

    fn check_name(
        &self,
        tx: &dyn Transaction,
        name: &str,
        except: Option<EdgeGroupId>,
    ) -> FlotillaResult<()> {
        if name.trim().is_empty() {
            return Err(FlotillaError::invalid_input("edge group name is required"));
        }
        let taken = self
            .groups
            .list(tx)?
            .iter()
            .any(|g| Some(g.id) != except && g.name.eq_ignore_ascii_case(name));
        if taken {
            return Err(FlotillaError::conflict(format!(
                "edge group '{}' already exists",
                name
            )));
        }
        Ok(())
    }

    /// Static members must be registered edge environments
    fn check_endpoints(&self, tx: &dyn Transaction, group: &EdgeGroup) -> FlotillaResult<()> {
        let unique: BTreeSet<EnvironmentId> = group.endpoints.iter().copied().collect();
        if unique.len() != group.endpoints.len() {
            return Err(FlotillaError::invalid_input(format!(
                "edge group '{}' lists an environment twice",
                group.name
            )));
        }
        for environment_id in unique {
            let environment = EnvironmentStore.get(tx, environment_id)?;
            if !environment.environment_type.is_edge() {
                return Err(FlotillaError::invalid_input(format!(
                    "environment {} is not an edge environment",
                    environment_id
                )));
            }
        }
        Ok(())
    }
}
