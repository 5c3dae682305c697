//! Storage seam for operation records.
//!
//! `InMemoryOperationStore` is the single-process default. A shared store
//! (e.g. an external cache) can implement the same trait for multi-process
//! deployments, but then must provide its own atomic compare-and-swap: the
//! manager's lock only serializes callers inside one process.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::operations::Operation;

pub trait OperationStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Operation>;
    fn set(&self, operation: Operation);
    fn delete(&self, id: &str) -> Option<Operation>;
    fn list_by_user(&self, user_id: &str) -> Vec<Operation>;
}

#[derive(Default)]
struct Tables {
    operations: HashMap<String, Operation>,
    by_user: HashMap<String, HashSet<String>>,
}

#[derive(Default)]
pub struct InMemoryOperationStore {
    tables: Mutex<Tables>,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OperationStore for InMemoryOperationStore {
    fn get(&self, id: &str) -> Option<Operation> {
        self.tables().operations.get(id).cloned()
    }

    fn set(&self, operation: Operation) {
        let mut tables = self.tables();
        tables
            .by_user
            .entry(operation.user_id.clone())
            .or_default()
            .insert(operation.id.clone());
        tables.operations.insert(operation.id.clone(), operation);
    }

    fn delete(&self, id: &str) -> Option<Operation> {
        let mut tables = self.tables();
        let removed = tables.operations.remove(id)?;
        if let Some(ids) = tables.by_user.get_mut(&removed.user_id) {
            ids.remove(id);
            if ids.is_empty() {
                tables.by_user.remove(&removed.user_id);
            }
        }
        Some(removed)
    }

    fn list_by_user(&self, user_id: &str) -> Vec<Operation> {
        let tables = self.tables();
        tables
            .by_user
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.operations.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}
