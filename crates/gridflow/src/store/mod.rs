//! Data stores: the pull/push boundary between the engine and row storage.
//!
//! A [`DataStore`] answers [`LoadOptions`](crate::query::LoadOptions) queries
//! through a completion callback and broadcasts external mutations through
//! its `pushed` signal. The adapter decides per query dimension whether the
//! store executes it (declared in [`StoreCapabilities`]) or the adapter
//! re-runs it locally on the returned rows.

mod array;

pub use array::ArrayStore;

use std::sync::Arc;

use gridflow_core::Signal;
use serde_json::Value;

use crate::error::{DataError, Result};
use crate::query::{LoadOptions, LoadResult};

/// Completion callback for [`DataStore::load`].
///
/// The store may invoke it synchronously from inside `load` or later from any
/// thread; callers must not assume either.
pub type LoadCompletion = Box<dyn FnOnce(Result<LoadResult>) + Send>;

/// Which query dimensions a store executes itself.
///
/// Dimensions left unset are re-run locally by the adapter on whatever rows
/// the store returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCapabilities {
    pub filtering: bool,
    pub sorting: bool,
    pub paging: bool,
    pub grouping: bool,
}

impl StoreCapabilities {
    /// No remote execution; the adapter does everything locally.
    pub fn none() -> Self {
        Self::default()
    }

    /// Every dimension executed by the store.
    pub fn all() -> Self {
        Self {
            filtering: true,
            sorting: true,
            paging: true,
            grouping: true,
        }
    }

    /// The default for remote stores: filtering, sorting and paging are
    /// shipped to the store, grouping stays local.
    pub fn remote_default() -> Self {
        Self {
            filtering: true,
            sorting: true,
            paging: true,
            grouping: false,
        }
    }
}

/// One externally originated mutation, delivered through a store's `pushed`
/// signal.
#[derive(Debug, Clone, PartialEq)]
pub enum PushChange {
    /// A new row appeared.
    Insert { data: Value },
    /// The row with `key` changed; `data` holds the changed fields and is
    /// merged into the existing payload.
    Update { key: Value, data: Value },
    /// The row with `key` disappeared.
    Remove { key: Value },
}

impl PushChange {
    /// The key the change targets, when it names one.
    pub fn key(&self) -> Option<&Value> {
        match self {
            Self::Insert { .. } => None,
            Self::Update { key, .. } | Self::Remove { key } => Some(key),
        }
    }
}

/// A queryable, observable row store.
pub trait DataStore: Send + Sync {
    /// The fields forming a row's key. Empty means the whole payload is the
    /// key.
    fn key_fields(&self) -> &[String];

    /// Which query dimensions this store executes itself.
    fn capabilities(&self) -> StoreCapabilities;

    /// Run a query. The completion receives the result exactly once and may
    /// run synchronously or later from another thread.
    fn load(&self, options: &LoadOptions, completion: LoadCompletion);

    /// Look up a single row by key.
    fn by_key(&self, key: &Value) -> Result<Value>;

    /// Apply external mutations to the stored rows immediately, then emit
    /// them through [`pushed`](Self::pushed).
    fn push(&self, changes: &[PushChange]);

    /// Signal emitted after `push` has mutated the stored rows.
    fn pushed(&self) -> &Arc<Signal<Vec<PushChange>>>;
}

/// Extract the key of a row payload per the store's key fields.
///
/// No key fields: the whole payload is its own key. One field: the bare
/// field value. Several: an array of the field values, in declaration order.
pub fn key_of(key_fields: &[String], row: &Value) -> Value {
    match key_fields {
        [] => row.clone(),
        [field] => crate::query::field_value(row, field),
        fields => Value::Array(
            fields
                .iter()
                .map(|f| crate::query::field_value(row, f))
                .collect(),
        ),
    }
}

/// Merge the fields of `patch` into `target`, recursively for nested objects.
///
/// Non-object patches replace the target outright.
pub fn merge_payload(target: &mut Value, patch: &Value) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(target_map), Some(patch_map)) => {
            for (field, value) in patch_map {
                match target_map.get_mut(field) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_payload(existing, value);
                    }
                    _ => {
                        target_map.insert(field.clone(), value.clone());
                    }
                }
            }
        }
        _ => *target = patch.clone(),
    }
}

pub(crate) fn key_not_found(key: &Value) -> DataError {
    DataError::KeyNotFound(key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_of_variants() {
        let row = json!({"id": 7, "rev": 2, "name": "x"});
        assert_eq!(key_of(&[], &row), row);
        assert_eq!(key_of(&["id".to_owned()], &row), json!(7));
        assert_eq!(
            key_of(&["id".to_owned(), "rev".to_owned()], &row),
            json!([7, 2])
        );
    }

    #[test]
    fn test_merge_payload_recursive() {
        let mut target = json!({"id": 1, "addr": {"city": "a", "zip": "1"}});
        merge_payload(&mut target, &json!({"addr": {"city": "b"}, "name": "n"}));
        assert_eq!(
            target,
            json!({"id": 1, "addr": {"city": "b", "zip": "1"}, "name": "n"})
        );
    }

    #[test]
    fn test_merge_payload_scalar_replaces() {
        let mut target = json!({"id": 1});
        merge_payload(&mut target, &json!(5));
        assert_eq!(target, json!(5));
    }
}
