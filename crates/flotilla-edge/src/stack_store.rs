//! Edge stack records

use tracing::{debug, warn};

use flotilla_common::{EdgeStackId, FlotillaError, FlotillaResult};
use flotilla_persistence::{Table, Transaction, TransactionExt};

use crate::model::EdgeStack;
use crate::relation::StackCounterUpdater;

/// Keyed access to edge stacks
#[derive(Clone, Copy, Debug, Default)]
pub struct EdgeStackStore;

impl EdgeStackStore {
    pub fn find(&self, tx: &dyn Transaction, id: EdgeStackId) -> FlotillaResult<Option<EdgeStack>> {
        Ok(tx.get_json(Table::EdgeStacks, &id.storage_key())?)
    }

    pub fn get(&self, tx: &dyn Transaction, id: EdgeStackId) -> FlotillaResult<EdgeStack> {
        self.find(tx, id)?
            .ok_or_else(|| FlotillaError::not_found("edge stack", id))
    }

    pub fn list(&self, tx: &dyn Transaction) -> FlotillaResult<Vec<EdgeStack>> {
        Ok(tx.scan_json(Table::EdgeStacks, "")?)
    }

    pub fn put(&self, tx: &mut dyn Transaction, stack: &EdgeStack) -> FlotillaResult<()> {
        tx.put_json(Table::EdgeStacks, &stack.id.storage_key(), stack)?;
        Ok(())
    }

    pub fn delete(&self, tx: &mut dyn Transaction, id: EdgeStackId) -> FlotillaResult<()> {
        if self.find(tx, id)?.is_none() {
            return Err(FlotillaError::not_found("edge stack", id));
        }
        tx.delete(Table::EdgeStacks, &id.storage_key())?;
        Ok(())
    }

    pub fn next_id(&self, tx: &mut dyn Transaction) -> FlotillaResult<EdgeStackId> {
        Ok(EdgeStackId::new(tx.next_sequence(Table::EdgeStacks)?))
    }

    /// Whether another stack already uses `name`, ignoring case
    pub fn name_taken(&self, tx: &dyn Transaction, name: &str) -> FlotillaResult<bool> {
        Ok(self
            .list(tx)?
            .iter()
            .any(|stack| stack.name.eq_ignore_ascii_case(name)))
    }

    /// Read-modify-write of one stack
    pub fn update_with<F>(
        &self,
        tx: &mut dyn Transaction,
        id: EdgeStackId,
        f: F,
    ) -> FlotillaResult<EdgeStack>
    where
        F: FnOnce(&mut EdgeStack),
    {
        let mut stack = self.get(tx, id)?;
        f(&mut stack);
        self.put(tx, &stack)?;
        Ok(stack)
    }
}

impl StackCounterUpdater for EdgeStackStore {
    fn adjust_deployments(
        &self,
        tx: &mut dyn Transaction,
        stack_id: EdgeStackId,
        delta: i64,
    ) -> FlotillaResult<()> {
        let Some(mut stack) = self.find(tx, stack_id)? else {
            debug!(stack_id = %stack_id, "Skipping counter update for missing edge stack");
            return Ok(());
        };

        let next = stack.num_deployments as i64 + delta;
        if next < 0 {
            warn!(
                stack_id = %stack_id,
                current = stack.num_deployments,
                delta,
                "Deployment count would go negative, clamping to zero"
            );
        }
        stack.num_deployments = next.clamp(0, u32::MAX as i64) as u32;
        self.put(tx, &stack)
    }

    fn set_deployments(
        &self,
        tx: &mut dyn Transaction,
        stack_id: EdgeStackId,
        count: u32,
    ) -> FlotillaResult<()> {
        let Some(mut stack) = self.find(tx, stack_id)? else {
            debug!(stack_id = %stack_id, "Skipping counter update for missing edge stack");
            return Ok(());
        };
        if stack.num_deployments != count {
            stack.num_deployments = count;
            self.put(tx, &stack)?;
        }
        Ok(())
    }
}
