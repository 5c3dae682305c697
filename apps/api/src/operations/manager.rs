//! Operation manager: guarded transitions, concurrency cap, timeout, cleanup.
//!
//! Every read-check-write runs under one process-wide lock that is never held
//! across an `.await`, so `has_conflict` + `start` (or `start_exclusive`) cannot
//! interleave with another transition. Timeout and retention timers are plain
//! tokio tasks holding a weak reference to the manager.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::operations::store::{InMemoryOperationStore, OperationStore};
use crate::operations::{Operation, OperationLimits, OperationStatus};
use crate::resilience::GenerationError;

#[derive(Clone)]
pub struct OperationManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn OperationStore>,
    limits: OperationLimits,
    gate: Mutex<()>,
    timeouts: Mutex<HashMap<String, AbortHandle>>,
    next_sequence: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl OperationManager {
    pub fn new(store: Arc<dyn OperationStore>, limits: OperationLimits) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                limits,
                gate: Mutex::new(()),
                timeouts: Mutex::new(HashMap::new()),
                next_sequence: AtomicU64::new(0),
            }),
        }
    }

    pub fn in_memory(limits: OperationLimits) -> Self {
        Self::new(Arc::new(InMemoryOperationStore::new()), limits)
    }

    pub fn limits(&self) -> &OperationLimits {
        &self.inner.limits
    }

    /// Creates a `Pending` operation and arms its timeout.
    ///
    /// Fails with `ConcurrencyLimit` when the user already has
    /// `max_concurrent` non-terminal operations.
    pub fn start(
        &self,
        user_id: &str,
        operation_type: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<String, GenerationError> {
        let _gate = lock(&self.inner.gate);
        self.start_locked(user_id, operation_type, metadata)
    }

    /// `has_conflict` + `start` as one atomic step.
    pub fn start_exclusive(
        &self,
        user_id: &str,
        operation_type: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<String, GenerationError> {
        let _gate = lock(&self.inner.gate);
        if self.conflict_locked(user_id, operation_type) {
            return Err(GenerationError::OperationConflict {
                user_id: user_id.to_string(),
                operation_type: operation_type.to_string(),
            });
        }
        self.start_locked(user_id, operation_type, metadata)
    }

    fn start_locked(
        &self,
        user_id: &str,
        operation_type: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<String, GenerationError> {
        let active = self.active_locked(user_id);
        if active >= self.inner.limits.max_concurrent {
            warn!(user_id, active, "Concurrent operation limit reached");
            return Err(GenerationError::ConcurrencyLimit {
                user_id: user_id.to_string(),
                limit: self.inner.limits.max_concurrent,
            });
        }

        let id = Uuid::new_v4().to_string();
        self.inner.store.set(Operation {
            id: id.clone(),
            user_id: user_id.to_string(),
            operation_type: operation_type.to_string(),
            status: OperationStatus::Pending,
            start_time: Utc::now(),
            completed_time: None,
            error: None,
            metadata: metadata.unwrap_or_default(),
            result: None,
            sequence: self.inner.next_sequence.fetch_add(1, Ordering::Relaxed),
        });
        self.arm_timeout(&id);

        info!(operation_id = %id, user_id, operation_type, "Operation started");
        Ok(id)
    }

    /// `Pending → InProgress`; merges `metadata` into the record.
    pub fn mark_in_progress(&self, operation_id: &str, metadata: Option<Map<String, Value>>) -> bool {
        self.transition(
            operation_id,
            &[OperationStatus::Pending],
            OperationStatus::InProgress,
            |op| {
                if let Some(extra) = metadata {
                    op.metadata.extend(extra);
                }
            },
        )
    }

    pub fn complete(&self, operation_id: &str, data: Option<Value>) -> bool {
        self.transition(
            operation_id,
            &[OperationStatus::Pending, OperationStatus::InProgress],
            OperationStatus::Completed,
            |op| op.result = data,
        )
    }

    pub fn fail(&self, operation_id: &str, error: impl Into<String>) -> bool {
        let error = error.into();
        self.transition(
            operation_id,
            &[OperationStatus::Pending, OperationStatus::InProgress],
            OperationStatus::Failed,
            |op| op.error = Some(error),
        )
    }

    /// Bookkeeping only: an in-flight service call keeps running and its
    /// result must be discarded by the caller.
    pub fn cancel(&self, operation_id: &str) -> bool {
        self.transition(
            operation_id,
            &[OperationStatus::Pending, OperationStatus::InProgress],
            OperationStatus::Cancelled,
            |_| {},
        )
    }

    /// True if the user has a non-terminal operation of exactly this type.
    pub fn has_conflict(&self, user_id: &str, operation_type: &str) -> bool {
        let _gate = lock(&self.inner.gate);
        self.conflict_locked(user_id, operation_type)
    }

    pub fn active_count(&self, user_id: &str) -> usize {
        let _gate = lock(&self.inner.gate);
        self.active_locked(user_id)
    }

    pub fn get_operation(&self, operation_id: &str) -> Option<Operation> {
        self.inner.store.get(operation_id)
    }

    /// The user's operations, most recent first. For observability only.
    pub fn get_user_operations(&self, user_id: &str) -> Vec<Operation> {
        let mut operations = self.inner.store.list_by_user(user_id);
        operations.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then(b.sequence.cmp(&a.sequence))
        });
        operations
    }

    fn conflict_locked(&self, user_id: &str, operation_type: &str) -> bool {
        self.inner
            .store
            .list_by_user(user_id)
            .iter()
            .any(|op| !op.status.is_terminal() && op.operation_type == operation_type)
    }

    fn active_locked(&self, user_id: &str) -> usize {
        self.inner
            .store
            .list_by_user(user_id)
            .iter()
            .filter(|op| !op.status.is_terminal())
            .count()
    }

    fn transition(
        &self,
        operation_id: &str,
        from: &[OperationStatus],
        to: OperationStatus,
        apply: impl FnOnce(&mut Operation),
    ) -> bool {
        {
            let _gate = lock(&self.inner.gate);
            let Some(mut op) = self.inner.store.get(operation_id) else {
                debug!(operation_id, ?to, "Transition on unknown operation");
                return false;
            };
            if !from.contains(&op.status) {
                debug!(operation_id, from = ?op.status, ?to, "Transition rejected");
                return false;
            }

            apply(&mut op);
            op.status = to;
            if to.is_terminal() {
                op.completed_time = Some(Utc::now());
            }
            self.inner.store.set(op);
        }

        info!(operation_id, status = ?to, "Operation transitioned");
        if to.is_terminal() {
            self.disarm_timeout(operation_id);
            self.schedule_cleanup(operation_id, to);
        }
        true
    }

    fn arm_timeout(&self, operation_id: &str) {
        let weak = Arc::downgrade(&self.inner);
        let id = operation_id.to_string();
        let after = self.inner.limits.timeout;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(manager) = upgrade(&weak) {
                lock(&manager.inner.timeouts).remove(&id);
                let error = GenerationError::Timeout {
                    operation_id: id.clone(),
                    after,
                };
                if manager.fail(&id, error.to_string()) {
                    warn!(operation_id = %id, "Operation timed out");
                }
            }
        });

        lock(&self.inner.timeouts).insert(operation_id.to_string(), handle.abort_handle());
    }

    fn disarm_timeout(&self, operation_id: &str) {
        if let Some(handle) = lock(&self.inner.timeouts).remove(operation_id) {
            handle.abort();
        }
    }

    fn schedule_cleanup(&self, operation_id: &str, status: OperationStatus) {
        let Some(retention) = self.inner.limits.retention(status) else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let id = operation_id.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if let Some(manager) = upgrade(&weak) {
                manager.inner.store.delete(&id);
                debug!(operation_id = %id, "Operation record dropped");
            }
        });
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<OperationManager> {
    weak.upgrade().map(|inner| OperationManager { inner })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn manager() -> OperationManager {
        OperationManager::in_memory(OperationLimits::default())
    }

    #[tokio::test]
    async fn test_fourth_concurrent_start_is_rejected() {
        let ops = manager();
        for _ in 0..3 {
            ops.start("u1", "email_sequence", None).unwrap();
        }
        let err = ops.start("u1", "email_sequence", None).unwrap_err();
        assert!(matches!(
            err,
            GenerationError::ConcurrencyLimit { limit: 3, .. }
        ));
        // Other users are unaffected.
        assert!(ops.start("u2", "email_sequence", None).is_ok());
    }

    #[tokio::test]
    async fn test_terminal_operations_free_a_slot() {
        let ops = manager();
        let first = ops.start("u1", "a", None).unwrap();
        ops.start("u1", "b", None).unwrap();
        ops.start("u1", "c", None).unwrap();
        assert!(ops.complete(&first, None));
        assert_eq!(ops.active_count("u1"), 2);
        assert!(ops.start("u1", "d", None).is_ok());
    }

    #[tokio::test]
    async fn test_mark_in_progress_only_from_pending() {
        let ops = manager();
        let id = ops.start("u1", "email_sequence", None).unwrap();

        let mut progress = Map::new();
        progress.insert("stage".to_string(), Value::from("generating"));
        assert!(ops.mark_in_progress(&id, Some(progress)));
        assert!(!ops.mark_in_progress(&id, None));

        let op = ops.get_operation(&id).unwrap();
        assert_eq!(op.status, OperationStatus::InProgress);
        assert_eq!(op.metadata["stage"], "generating");
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let ops = manager();
        let id = ops.start("u1", "email_sequence", None).unwrap();
        assert!(ops.mark_in_progress(&id, None));
        assert!(ops.complete(&id, Some(Value::from(5))));

        assert!(!ops.complete(&id, None));
        assert!(!ops.fail(&id, "late failure"));
        assert!(!ops.cancel(&id));
        assert!(!ops.mark_in_progress(&id, None));

        let op = ops.get_operation(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.result, Some(Value::from(5)));
        assert!(op.completed_time.is_some());
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let ops = manager();
        let id = ops.start("u1", "email_sequence", None).unwrap();
        assert!(ops.cancel(&id));
        assert!(!ops.mark_in_progress(&id, None));
        assert_eq!(
            ops.get_operation(&id).unwrap().status,
            OperationStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_fail_records_error() {
        let ops = manager();
        let id = ops.start("u1", "email_sequence", None).unwrap();
        assert!(ops.fail(&id, "service returned 401: invalid key"));
        let op = ops.get_operation(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.error.as_deref(), Some("service returned 401: invalid key"));
    }

    #[tokio::test]
    async fn test_unknown_operation_transitions_are_noops() {
        let ops = manager();
        assert!(!ops.mark_in_progress("missing", None));
        assert!(!ops.complete("missing", None));
        assert!(!ops.fail("missing", "x"));
        assert!(!ops.cancel("missing"));
    }

    #[tokio::test]
    async fn test_has_conflict_matches_type_and_liveness() {
        let ops = manager();
        let id = ops.start("u1", "email_sequence", None).unwrap();
        assert!(ops.has_conflict("u1", "email_sequence"));
        assert!(!ops.has_conflict("u1", "coaching_feedback"));
        assert!(!ops.has_conflict("u2", "email_sequence"));

        ops.complete(&id, None);
        assert!(!ops.has_conflict("u1", "email_sequence"));
    }

    #[tokio::test]
    async fn test_start_exclusive_rejects_duplicate_type() {
        let ops = manager();
        ops.start_exclusive("u1", "email_sequence", None).unwrap();
        let err = ops
            .start_exclusive("u1", "email_sequence", None)
            .unwrap_err();
        assert!(matches!(err, GenerationError::OperationConflict { .. }));
        assert!(ops.start_exclusive("u1", "coaching_feedback", None).is_ok());
    }

    #[tokio::test]
    async fn test_user_operations_most_recent_first() {
        let ops = manager();
        let first = ops.start("u1", "a", None).unwrap();
        let second = ops.start("u1", "b", None).unwrap();
        let third = ops.start("u1", "c", None).unwrap();
        ops.start("u2", "a", None).unwrap();

        let ids: Vec<String> = ops
            .get_user_operations("u1")
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(ids, vec![third, second, first]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_operation_times_out() {
        let ops = manager();
        let id = ops.start("u1", "email_sequence", None).unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;

        let op = ops.get_operation(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert!(op.error.unwrap().contains("timed out"));
        assert_eq!(ops.active_count("u1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_progress_operation_times_out() {
        let ops = manager();
        let id = ops.start("u1", "email_sequence", None).unwrap();
        ops.mark_in_progress(&id, None);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(
            ops.get_operation(&id).unwrap().status,
            OperationStatus::InProgress
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            ops.get_operation(&id).unwrap().status,
            OperationStatus::Failed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_operation_is_not_timed_out() {
        let ops = manager();
        let id = ops.start("u1", "email_sequence", None).unwrap();
        ops.complete(&id, None);

        tokio::time::sleep(Duration::from_secs(31)).await;

        let op = ops.get_operation(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert!(op.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_are_dropped_after_retention() {
        let ops = manager();
        let completed = ops.start("u1", "a", None).unwrap();
        let failed = ops.start("u1", "b", None).unwrap();
        let cancelled = ops.start("u1", "c", None).unwrap();
        ops.complete(&completed, None);
        ops.fail(&failed, "boom");
        ops.cancel(&cancelled);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(ops.get_operation(&cancelled).is_none());
        assert!(ops.get_operation(&completed).is_some());

        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        assert!(ops.get_operation(&completed).is_none());
        assert!(ops.get_operation(&failed).is_some());

        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        assert!(ops.get_operation(&failed).is_none());
        assert!(ops.get_user_operations("u1").is_empty());
    }
}
