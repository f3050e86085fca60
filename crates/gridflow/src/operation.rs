//! Operation lifecycle tracking for overlapping loads.
//!
//! Every load gets a monotonically increasing [`OperationId`]. When its
//! result arrives, [`OperationManager::settle`] decides once whether the
//! result may still be applied or was overtaken by a cancellation. Cancelling
//! marks the operation but keeps it registered until its result settles, so a
//! late completion is recognized and discarded rather than mistaken for an
//! unknown operation.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

/// Identity of one in-flight load. Monotone within a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u64);

/// The verdict for a settled operation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The operation is live; apply its result.
    Apply,
    /// The operation was canceled or never existed; drop the result silently.
    Discard,
}

#[derive(Debug, Default)]
struct PendingOperation {
    canceled: bool,
    context: serde_json::Map<String, Value>,
}

#[derive(Debug, Default)]
struct ManagerInner {
    next_id: u64,
    pending: HashMap<u64, PendingOperation>,
}

/// Tracks in-flight operations and resolves result races.
#[derive(Debug, Default)]
pub struct OperationManager {
    inner: Mutex<ManagerInner>,
}

impl OperationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new operation and return its id.
    pub fn create(&self) -> OperationId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.pending.insert(id, PendingOperation::default());
        OperationId(id)
    }

    /// Mark an operation canceled. Returns `false` if it already settled.
    ///
    /// The operation stays registered so its eventual result settles as
    /// [`SettleOutcome::Discard`].
    pub fn cancel(&self, id: OperationId) -> bool {
        let mut inner = self.inner.lock();
        match inner.pending.get_mut(&id.0) {
            Some(op) => {
                op.canceled = true;
                true
            }
            None => false,
        }
    }

    /// Cancel every pending operation. Idempotent.
    pub fn cancel_all(&self) {
        let mut inner = self.inner.lock();
        for op in inner.pending.values_mut() {
            op.canceled = true;
        }
    }

    /// Resolve an arrived result: removes the operation and reports whether
    /// the result may be applied.
    pub fn settle(&self, id: OperationId) -> SettleOutcome {
        let mut inner = self.inner.lock();
        match inner.pending.remove(&id.0) {
            Some(op) if !op.canceled => SettleOutcome::Apply,
            _ => SettleOutcome::Discard,
        }
    }

    /// Whether the operation is still pending and not canceled.
    pub fn is_live(&self, id: OperationId) -> bool {
        let inner = self.inner.lock();
        inner.pending.get(&id.0).is_some_and(|op| !op.canceled)
    }

    /// Ids of the pending, not-yet-canceled operations in creation order.
    pub fn live_ids(&self) -> Vec<OperationId> {
        let inner = self.inner.lock();
        let mut ids: Vec<OperationId> = inner
            .pending
            .iter()
            .filter(|(_, op)| !op.canceled)
            .map(|(id, _)| OperationId(*id))
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Attach a context entry to a pending operation. Ignored once settled.
    pub fn set_context(&self, id: OperationId, field: impl Into<String>, value: Value) {
        let mut inner = self.inner.lock();
        if let Some(op) = inner.pending.get_mut(&id.0) {
            op.context.insert(field.into(), value);
        }
    }

    /// Read a context entry from a pending operation.
    pub fn context(&self, id: OperationId, field: &str) -> Option<Value> {
        let inner = self.inner.lock();
        inner.pending.get(&id.0).and_then(|op| op.context.get(field).cloned())
    }

    /// Number of unsettled operations, canceled ones included.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Drop all pending operations without settling them. For disposal.
    pub fn clear(&self) {
        self.inner.lock().pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotone() {
        let mgr = OperationManager::new();
        let a = mgr.create();
        let b = mgr.create();
        assert!(b > a);
    }

    #[test]
    fn test_settle_live_operation() {
        let mgr = OperationManager::new();
        let id = mgr.create();
        assert!(mgr.is_live(id));
        assert_eq!(mgr.settle(id), SettleOutcome::Apply);
        assert_eq!(mgr.pending_count(), 0);
    }

    #[test]
    fn test_canceled_operation_discards() {
        let mgr = OperationManager::new();
        let id = mgr.create();
        assert!(mgr.cancel(id));
        assert!(!mgr.is_live(id));
        // Still registered so the late result is recognized.
        assert_eq!(mgr.pending_count(), 1);
        assert_eq!(mgr.settle(id), SettleOutcome::Discard);
        assert_eq!(mgr.pending_count(), 0);
    }

    #[test]
    fn test_cancel_after_settle_is_rejected() {
        let mgr = OperationManager::new();
        let id = mgr.create();
        assert_eq!(mgr.settle(id), SettleOutcome::Apply);
        assert!(!mgr.cancel(id));
    }

    #[test]
    fn test_settle_unknown_discards() {
        let mgr = OperationManager::new();
        assert_eq!(mgr.settle(OperationId(99)), SettleOutcome::Discard);
    }

    #[test]
    fn test_cancel_all_is_idempotent() {
        let mgr = OperationManager::new();
        let a = mgr.create();
        let b = mgr.create();
        assert_eq!(mgr.live_ids(), vec![a, b]);
        mgr.cancel_all();
        assert!(mgr.live_ids().is_empty());
        mgr.cancel_all();
        assert_eq!(mgr.settle(a), SettleOutcome::Discard);
        assert_eq!(mgr.settle(b), SettleOutcome::Discard);
    }

    #[test]
    fn test_context_roundtrip() {
        let mgr = OperationManager::new();
        let id = mgr.create();
        mgr.set_context(id, "changes_only", serde_json::json!(true));
        assert_eq!(mgr.context(id, "changes_only"), Some(serde_json::json!(true)));
        assert_eq!(mgr.context(id, "missing"), None);
        mgr.settle(id);
        assert_eq!(mgr.context(id, "changes_only"), None);
    }
}
