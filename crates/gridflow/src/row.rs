//! Materialized row items and change descriptors.
//!
//! A [`RowItem`] is one realized row of the windowed view: its stable key, the
//! raw source payload, and the cell values projected through the visible
//! columns. The controller owns the materialized list exclusively;
//! `row_index` is recomputed on every materialization pass and is not stable
//! across passes — the key is the only stable identity.
//!
//! A [`Change`] describes one reconciliation pass to the rendering layer,
//! either as a full refresh or as a minimal edit script with per-row change
//! types and per-column dirty sets.

use serde_json::Value;

/// The semantic kind of a materialized row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKind {
    /// A plain data row.
    Data,
    /// A group header row.
    Group,
    /// A group footer row.
    GroupFooter,
    /// An expanded detail row.
    Detail,
}

/// One realized row of the materialized, windowed view.
#[derive(Debug, Clone, PartialEq)]
pub struct RowItem {
    /// Stable row identity, extracted by the store's key expression. Group
    /// rows carry the path of group values.
    pub key: Value,
    /// The raw source payload the row was projected from.
    pub data: Value,
    /// Cell values, one per visible column.
    pub values: Vec<Value>,
    /// Per-cell modification markers, when the host tracks editing state.
    pub modified_values: Option<Vec<Option<Value>>>,
    /// The row's kind.
    pub kind: RowKind,
    /// Position within the current materialized list. Recomputed every pass.
    pub row_index: usize,
    /// Group rows: whether the group is expanded.
    pub is_expanded: bool,
    /// Detail rows: whether an editor is active.
    pub is_editing: bool,
    /// Whether the row is visible to the rendering layer.
    pub visible: bool,
}

impl RowItem {
    /// Create a data row. Values are projected later by the controller.
    pub fn data_row(key: Value, data: Value) -> Self {
        Self {
            key,
            data,
            values: Vec::new(),
            modified_values: None,
            kind: RowKind::Data,
            row_index: 0,
            is_expanded: false,
            is_editing: false,
            visible: true,
        }
    }

    /// Create a group header row for the given group value path.
    pub fn group_row(key_path: Value, data: Value, is_expanded: bool) -> Self {
        Self {
            key: key_path,
            data,
            values: Vec::new(),
            modified_values: None,
            kind: RowKind::Group,
            row_index: 0,
            is_expanded,
            is_editing: false,
            visible: true,
        }
    }

    /// The diff identity of this row: kind plus serialized key.
    ///
    /// Two rows are candidates for matching only when both components agree;
    /// the serialized form keeps object-valued keys comparable and hashable.
    pub fn diff_key(&self) -> RowKey {
        RowKey {
            kind: self.kind,
            key: self.key.to_string(),
        }
    }
}

/// Stable diff identity of a row: `(rowKind, serialized key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey {
    pub kind: RowKind,
    pub key: String,
}

/// The kind of a per-row change inside an incremental update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowChangeKind {
    Insert,
    Update,
    Remove,
}

/// Whether a change descriptor replaces the whole list or patches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Full structural replace of the materialized list.
    Refresh,
    /// Minimal per-row edit script.
    Update,
}

/// Which query dimensions changed in the load that produced a pass.
///
/// Stamped onto the resulting [`Change`] so consumers see why a pass happened
/// without the engine keeping ambient "current operation" state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationTypes {
    pub reload: bool,
    pub filtering: bool,
    pub sorting: bool,
    pub grouping: bool,
    pub paging: bool,
    pub page_size: bool,
}

impl OperationTypes {
    /// An explicit reload with every dimension considered changed.
    pub fn full_reload() -> Self {
        Self {
            reload: true,
            filtering: true,
            sorting: true,
            grouping: true,
            paging: true,
            page_size: true,
        }
    }
}

/// One reconciliation pass, consumed once by the rendering layer.
///
/// For [`ChangeKind::Update`] the parallel arrays describe the edit script:
/// `row_indices`, `change_types` and `column_indices` always have equal
/// length, and `items` carries the new row for inserts/updates and the old
/// row as a placeholder for removes. Applying the script in emitted order to
/// the previous list yields the new list.
#[derive(Debug, Clone)]
pub struct Change {
    pub kind: ChangeKind,
    pub items: Vec<RowItem>,
    pub row_indices: Vec<usize>,
    pub change_types: Vec<RowChangeKind>,
    pub column_indices: Vec<Option<Vec<usize>>>,
    /// Whether the rendering layer may restrict repainting to the listed
    /// rows/columns instead of rebuilding the view.
    pub repaint_changes_only: bool,
    /// Whether the pass may have changed view geometry (page flips, reloads).
    pub need_update_dimensions: bool,
    /// The query dimensions whose change triggered this pass, if any.
    pub operation_types: Option<OperationTypes>,
}

impl Change {
    /// A full structural refresh carrying the complete new list.
    pub fn refresh(items: Vec<RowItem>) -> Self {
        Self {
            kind: ChangeKind::Refresh,
            items,
            row_indices: Vec::new(),
            change_types: Vec::new(),
            column_indices: Vec::new(),
            repaint_changes_only: false,
            need_update_dimensions: false,
            operation_types: None,
        }
    }

    /// An empty incremental update, filled in by the diff pass.
    pub fn update() -> Self {
        Self {
            kind: ChangeKind::Update,
            items: Vec::new(),
            row_indices: Vec::new(),
            change_types: Vec::new(),
            column_indices: Vec::new(),
            repaint_changes_only: true,
            need_update_dimensions: false,
            operation_types: None,
        }
    }

    /// Push one edit-script entry, keeping the parallel arrays in step.
    pub fn push_entry(
        &mut self,
        row_index: usize,
        change_type: RowChangeKind,
        item: RowItem,
        column_indices: Option<Vec<usize>>,
    ) {
        self.items.push(item);
        self.row_indices.push(row_index);
        self.change_types.push(change_type);
        self.column_indices.push(column_indices);
    }

    /// Number of edit-script entries.
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.row_indices.len(), self.change_types.len());
        debug_assert_eq!(self.row_indices.len(), self.column_indices.len());
        self.row_indices.len()
    }

    /// Whether the edit script is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_key_separates_kinds() {
        let data = RowItem::data_row(json!(1), json!({"id": 1}));
        let group = RowItem::group_row(json!(1), json!({"key": 1}), true);

        assert_ne!(data.diff_key(), group.diff_key());
        assert_eq!(data.diff_key(), RowItem::data_row(json!(1), json!(null)).diff_key());
    }

    #[test]
    fn test_diff_key_serializes_compound_keys() {
        let a = RowItem::data_row(json!({"a": 1, "b": 2}), json!(null));
        let b = RowItem::data_row(json!({"a": 1, "b": 2}), json!(null));
        assert_eq!(a.diff_key(), b.diff_key());
    }

    #[test]
    fn test_change_parallel_arrays() {
        let mut change = Change::update();
        change.push_entry(
            0,
            RowChangeKind::Update,
            RowItem::data_row(json!(1), json!(null)),
            Some(vec![2]),
        );
        change.push_entry(
            1,
            RowChangeKind::Remove,
            RowItem::data_row(json!(2), json!(null)),
            None,
        );

        assert_eq!(change.len(), 2);
        assert_eq!(change.items.len(), 2);
        assert_eq!(change.change_types, vec![RowChangeKind::Update, RowChangeKind::Remove]);
    }
}
