//! Environment and environment group registration
//!
//! Registering, retagging or regrouping an environment changes which dynamic
//! edge groups select it, so every such change reconciles the environment's
//! relation and status records with the stacks that now target it.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use flotilla_common::{
    EdgeStackId, EnvironmentGroupId, EnvironmentId, FlotillaError, FlotillaResult, TagId,
};
use flotilla_persistence::{Table, Transaction, TransactionExt};

use crate::group::EdgeGroupStore;
use crate::lifecycle::FleetSnapshot;
use crate::model::{
    EndpointRelation, Environment, EnvironmentGroup, EnvironmentType,
    UNASSIGNED_ENVIRONMENT_GROUP,
};
use crate::relation::EndpointRelationStore;
use crate::stack_store::EdgeStackStore;
use crate::status::EdgeStackStatusStore;

const UNASSIGNED_GROUP_NAME: &str = "Unassigned";

/// Keyed access to environments and environment groups
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvironmentStore;

impl EnvironmentStore {
    pub fn find(
        &self,
        tx: &dyn Transaction,
        id: EnvironmentId,
    ) -> FlotillaResult<Option<Environment>> {
        Ok(tx.get_json(Table::Environments, &id.storage_key())?)
    }

    pub fn get(&self, tx: &dyn Transaction, id: EnvironmentId) -> FlotillaResult<Environment> {
        self.find(tx, id)?
            .ok_or_else(|| FlotillaError::not_found("environment", id))
    }

    pub fn list(&self, tx: &dyn Transaction) -> FlotillaResult<Vec<Environment>> {
        Ok(tx.scan_json(Table::Environments, "")?)
    }

    pub fn put(&self, tx: &mut dyn Transaction, environment: &Environment) -> FlotillaResult<()> {
        tx.put_json(Table::Environments, &environment.id.storage_key(), environment)?;
        Ok(())
    }

    pub fn delete(&self, tx: &mut dyn Transaction, id: EnvironmentId) -> FlotillaResult<()> {
        tx.delete(Table::Environments, &id.storage_key())?;
        Ok(())
    }

    pub fn find_group(
        &self,
        tx: &dyn Transaction,
        id: EnvironmentGroupId,
    ) -> FlotillaResult<Option<EnvironmentGroup>> {
        Ok(tx.get_json(Table::EnvironmentGroups, &id.storage_key())?)
    }

    pub fn get_group(
        &self,
        tx: &dyn Transaction,
        id: EnvironmentGroupId,
    ) -> FlotillaResult<EnvironmentGroup> {
        self.find_group(tx, id)?
            .ok_or_else(|| FlotillaError::not_found("environment group", id))
    }

    pub fn list_groups(&self, tx: &dyn Transaction) -> FlotillaResult<Vec<EnvironmentGroup>> {
        Ok(tx.scan_json(Table::EnvironmentGroups, "")?)
    }

    pub fn put_group(
        &self,
        tx: &mut dyn Transaction,
        group: &EnvironmentGroup,
    ) -> FlotillaResult<()> {
        tx.put_json(Table::EnvironmentGroups, &group.id.storage_key(), group)?;
        Ok(())
    }

    fn next_id(&self, tx: &mut dyn Transaction) -> FlotillaResult<EnvironmentId> {
        Ok(EnvironmentId::new(tx.next_sequence(Table::Environments)?))
    }

    /// Next free group ID; the unassigned group's ID is skipped once taken
    fn next_group_id(&self, tx: &mut dyn Transaction) -> FlotillaResult<EnvironmentGroupId> {
        loop {
            let id = EnvironmentGroupId::new(tx.next_sequence(Table::EnvironmentGroups)?);
            if self.find_group(tx, id)?.is_none() {
                return Ok(id);
            }
        }
    }
}

/// Input of [`EnvironmentService::register_environment`]
#[derive(Clone, Debug)]
pub struct RegisterEnvironmentRequest {
    pub name: String,
    pub environment_type: EnvironmentType,
    /// Defaults to the unassigned group
    pub group_id: Option<EnvironmentGroupId>,
    pub tag_ids: Vec<TagId>,
    pub edge_id: Option<String>,
}

/// Input of [`EnvironmentService::update_environment`]; `None` keeps the field
#[derive(Clone, Debug, Default)]
pub struct UpdateEnvironmentRequest {
    pub group_id: Option<EnvironmentGroupId>,
    pub tag_ids: Option<Vec<TagId>>,
}

/// Environment registration and membership reconciliation
pub struct EnvironmentService {
    relations: Arc<EndpointRelationStore>,
    environments: EnvironmentStore,
    edge_groups: EdgeGroupStore,
    stacks: EdgeStackStore,
    statuses: EdgeStackStatusStore,
}

impl EnvironmentService {
    pub fn new(relations: Arc<EndpointRelationStore>) -> Self {
        Self {
            relations,
            environments: EnvironmentStore,
            edge_groups: EdgeGroupStore,
            stacks: EdgeStackStore,
            statuses: EdgeStackStatusStore,
        }
    }

    pub fn store(&self) -> &EnvironmentStore {
        &self.environments
    }

    /// Create the unassigned environment group if it is missing
    pub fn ensure_default_environment_group(&self, tx: &mut dyn Transaction) -> FlotillaResult<()> {
        if self
            .environments
            .find_group(tx, UNASSIGNED_ENVIRONMENT_GROUP)?
            .is_some()
        {
            return Ok(());
        }
        self.environments.put_group(
            tx,
            &EnvironmentGroup {
                id: UNASSIGNED_ENVIRONMENT_GROUP,
                name: UNASSIGNED_GROUP_NAME.to_string(),
                tag_ids: vec![],
            },
        )?;
        info!("Created default environment group");
        Ok(())
    }

    pub fn create_environment_group(
        &self,
        tx: &mut dyn Transaction,
        name: &str,
        tag_ids: Vec<TagId>,
    ) -> FlotillaResult<EnvironmentGroup> {
        if name.trim().is_empty() {
            return Err(FlotillaError::invalid_input("environment group name is required"));
        }
        self.ensure_default_environment_group(tx)?;
        if self
            .environments
            .list_groups(tx)?
            .iter()
            .any(|g| g.name.eq_ignore_ascii_case(name))
        {
            return Err(FlotillaError::conflict(format!(
                "environment group '{}' already exists",
                name
            )));
        }

        let group = EnvironmentGroup {
            id: self.environments.next_group_id(tx)?,
            name: name.to_string(),
            tag_ids,
        };
        self.environments.put_group(tx, &group)?;
        info!(group_id = %group.id, name = %group.name, "Created environment group");
        Ok(group)
    }

    /// Replace a group's tags and reconcile every member
    pub fn update_environment_group(
        &self,
        tx: &mut dyn Transaction,
        id: EnvironmentGroupId,
        tag_ids: Vec<TagId>,
    ) -> FlotillaResult<EnvironmentGroup> {
        let mut group = self.environments.get_group(tx, id)?;
        group.tag_ids = tag_ids;
        self.environments.put_group(tx, &group)?;

        let snapshot = FleetSnapshot::load(tx)?;
        let members: Vec<EnvironmentId> = snapshot
            .environments
            .iter()
            .filter(|env| env.group_id == id)
            .map(|env| env.id)
            .collect();
        for environment_id in members {
            self.reconcile_environment(tx, &snapshot, environment_id)?;
        }
        Ok(group)
    }

    pub fn register_environment(
        &self,
        tx: &mut dyn Transaction,
        request: RegisterEnvironmentRequest,
    ) -> FlotillaResult<Environment> {
        if request.name.trim().is_empty() {
            return Err(FlotillaError::invalid_input("environment name is required"));
        }
        self.ensure_default_environment_group(tx)?;
        let group_id = request.group_id.unwrap_or(UNASSIGNED_ENVIRONMENT_GROUP);
        self.environments.get_group(tx, group_id)?;

        let environment = Environment {
            id: self.environments.next_id(tx)?,
            name: request.name,
            environment_type: request.environment_type,
            group_id,
            tag_ids: request.tag_ids,
            edge_id: request.edge_id,
        };
        self.environments.put(tx, &environment)?;

        let snapshot = FleetSnapshot::load(tx)?;
        let targeting = self.targeting_stacks(tx, &snapshot, &environment)?;

        let mut relation = EndpointRelation::new(environment.id);
        relation
            .edge_stacks
            .extend(targeting.iter().map(|id| (*id, true)));
        self.relations.create(tx, &relation)?;
        for stack_id in &targeting {
            self.statuses.create(tx, *stack_id, environment.id)?;
        }

        info!(
            environment_id = %environment.id,
            name = %environment.name,
            stacks = targeting.len(),
            "Registered environment"
        );
        Ok(environment)
    }

    /// Change an environment's tags or group and reconcile its stacks
    pub fn update_environment(
        &self,
        tx: &mut dyn Transaction,
        id: EnvironmentId,
        request: UpdateEnvironmentRequest,
    ) -> FlotillaResult<Environment> {
        let mut environment = self.environments.get(tx, id)?;
        if let Some(group_id) = request.group_id {
            self.environments.get_group(tx, group_id)?;
            environment.group_id = group_id;
        }
        if let Some(tag_ids) = request.tag_ids {
            environment.tag_ids = tag_ids;
        }
        self.environments.put(tx, &environment)?;

        let snapshot = FleetSnapshot::load(tx)?;
        self.reconcile_environment(tx, &snapshot, id)?;
        Ok(environment)
    }

    /// Delete an environment together with its relation and status records
    pub fn remove_environment(&self, tx: &mut dyn Transaction, id: EnvironmentId) -> FlotillaResult<()> {
        self.environments.get(tx, id)?;

        if let Some(relation) = self.relations.find(tx, id)? {
            for stack_id in relation.edge_stacks.keys() {
                self.statuses.delete(tx, *stack_id, id)?;
            }
            self.relations.delete(tx, id)?;
        }

        for mut group in self.edge_groups.list(tx)? {
            if !group.dynamic && group.endpoints.contains(&id) {
                group.endpoints.retain(|e| *e != id);
                self.edge_groups.put(tx, &group)?;
            }
        }

        self.environments.delete(tx, id)?;
        info!(environment_id = %id, "Removed environment");
        Ok(())
    }

    /// Rewrite the relation of `environment_id` to the stacks that currently
    /// target it and create or delete status records for the difference
    fn reconcile_environment(
        &self,
        tx: &mut dyn Transaction,
        snapshot: &FleetSnapshot,
        environment_id: EnvironmentId,
    ) -> FlotillaResult<()> {
        let Some(environment) = snapshot.environment(environment_id) else {
            return Err(FlotillaError::not_found("environment", environment_id));
        };
        let desired = self.targeting_stacks(tx, snapshot, environment)?;
        let current = self
            .relations
            .find(tx, environment_id)?
            .map(|r| r.active_stacks())
            .unwrap_or_default();

        let mut relation = EndpointRelation::new(environment_id);
        relation
            .edge_stacks
            .extend(desired.iter().map(|id| (*id, true)));
        self.relations.update(tx, environment_id, &relation)?;

        for stack_id in current.difference(&desired) {
            self.statuses.delete(tx, *stack_id, environment_id)?;
        }
        for stack_id in desired.difference(&current) {
            self.statuses.create(tx, *stack_id, environment_id)?;
        }

        debug!(
            environment_id = %environment_id,
            added = desired.difference(&current).count(),
            removed = current.difference(&desired).count(),
            "Reconciled environment relations"
        );
        Ok(())
    }

    /// Stacks whose edge groups select `environment`
    ///
    /// Fails when a selecting stack cannot run on the environment's type.
    fn targeting_stacks(
        &self,
        tx: &dyn Transaction,
        snapshot: &FleetSnapshot,
        environment: &Environment,
    ) -> FlotillaResult<BTreeSet<EdgeStackId>> {
        let mut targeting = BTreeSet::new();
        for stack in self.stacks.list(tx)? {
            if !snapshot.selects(&stack.edge_groups, environment) {
                continue;
            }
            if !stack.deployment_type.supports(environment.environment_type) {
                return Err(FlotillaError::invalid_input(format!(
                    "environment '{}' would be targeted by {} stack '{}' it cannot run",
                    environment.name, stack.deployment_type, stack.name
                )));
            }
            targeting.insert(stack.id);
        }
        Ok(targeting)
    }
}
