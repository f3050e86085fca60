//! In-memory store backed by a `Vec` of row payloads.

use std::sync::Arc;

use gridflow_core::Signal;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

use gridflow_core::logging::targets;

use crate::error::Result;
use crate::query::{LoadOptions, LoadResult};
use crate::store::{
    key_not_found, key_of, merge_payload, DataStore, LoadCompletion, PushChange, StoreCapabilities,
};

/// An in-memory [`DataStore`] over a vector of rows.
///
/// Declares no remote capabilities, so the adapter runs every query dimension
/// locally. Loads resolve synchronously with a clone of the rows. `push`
/// mutates the vector in place and then emits the changes.
pub struct ArrayStore {
    rows: RwLock<Vec<Value>>,
    key_fields: Vec<String>,
    pushed: Arc<Signal<Vec<PushChange>>>,
}

impl ArrayStore {
    pub fn new(rows: Vec<Value>, key_fields: Vec<String>) -> Self {
        Self {
            rows: RwLock::new(rows),
            key_fields,
            pushed: Arc::new(Signal::new()),
        }
    }

    /// Snapshot of the stored rows.
    pub fn rows(&self) -> Vec<Value> {
        self.rows.read().clone()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn position_of(&self, rows: &[Value], key: &Value) -> Option<usize> {
        rows.iter()
            .position(|row| key_of(&self.key_fields, row) == *key)
    }
}

impl DataStore for ArrayStore {
    fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::none()
    }

    fn load(&self, options: &LoadOptions, completion: LoadCompletion) {
        let rows = self.rows.read().clone();
        let total_count = options.require_total_count.then(|| rows.len() as i64);
        trace!(
            target: targets::SOURCE,
            rows = rows.len(),
            total = ?total_count,
            "array store load"
        );
        completion(Ok(LoadResult {
            rows,
            total_count,
            next_token: None,
        }));
    }

    fn by_key(&self, key: &Value) -> Result<Value> {
        let rows = self.rows.read();
        self.position_of(&rows, key)
            .map(|i| rows[i].clone())
            .ok_or_else(|| key_not_found(key))
    }

    fn push(&self, changes: &[PushChange]) {
        {
            let mut rows = self.rows.write();
            for change in changes {
                match change {
                    PushChange::Insert { data } => rows.push(data.clone()),
                    PushChange::Update { key, data } => {
                        if let Some(i) = self.position_of(&rows, key) {
                            merge_payload(&mut rows[i], data);
                        }
                    }
                    PushChange::Remove { key } => {
                        if let Some(i) = self.position_of(&rows, key) {
                            rows.remove(i);
                        }
                    }
                }
            }
        }
        self.pushed.emit(changes.to_vec());
    }

    fn pushed(&self) -> &Arc<Signal<Vec<PushChange>>> {
        &self.pushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ArrayStore {
        ArrayStore::new(
            vec![
                json!({"id": 1, "name": "a"}),
                json!({"id": 2, "name": "b"}),
            ],
            vec!["id".to_owned()],
        )
    }

    fn load_sync(store: &ArrayStore, options: &LoadOptions) -> LoadResult {
        let result = Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&result);
        store.load(options, Box::new(move |r| *slot.lock() = Some(r)));
        let taken = result.lock().take().expect("synchronous completion");
        taken.expect("load ok")
    }

    #[test]
    fn test_load_returns_all_rows() {
        let store = store();
        let result = load_sync(&store, &LoadOptions::default());
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.total_count, None);
    }

    #[test]
    fn test_load_counts_when_requested() {
        let store = store();
        let options = LoadOptions {
            require_total_count: true,
            ..Default::default()
        };
        assert_eq!(load_sync(&store, &options).total_count, Some(2));
    }

    #[test]
    fn test_by_key() {
        let store = store();
        assert_eq!(store.by_key(&json!(2)).unwrap(), json!({"id": 2, "name": "b"}));
        assert!(store.by_key(&json!(9)).is_err());
    }

    #[test]
    fn test_push_mutates_then_emits() {
        let store = store();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let slot = Arc::clone(&seen);
        let _id = store.pushed().connect(move |changes: &Vec<PushChange>| {
            slot.lock().push(changes.len());
        });

        store.push(&[
            PushChange::Update {
                key: json!(1),
                data: json!({"name": "a2"}),
            },
            PushChange::Insert {
                data: json!({"id": 3, "name": "c"}),
            },
        ]);

        assert_eq!(store.len(), 3);
        assert_eq!(store.by_key(&json!(1)).unwrap()["name"], json!("a2"));
        assert_eq!(*seen.lock(), vec![2]);

        store.push(&[PushChange::Remove { key: json!(2) }]);
        assert_eq!(store.len(), 2);
        assert!(store.by_key(&json!(2)).is_err());
    }

    #[test]
    fn test_push_unknown_key_is_noop() {
        let store = store();
        store.push(&[PushChange::Update {
            key: json!(42),
            data: json!({"name": "x"}),
        }]);
        assert_eq!(store.len(), 2);
    }
}
