//! Minimal edit-script computation between two materialized row lists.
//!
//! [`find_changes`] walks both lists with one pointer each, matching rows by
//! [`RowKey`](crate::row::RowKey). At a mismatch it first probes the next row
//! on either side (the cheap strict check that resolves a single insert or
//! remove), then falls back to key-presence lookups across the whole other
//! list. When both keys exist elsewhere — several rows moved past each other —
//! the walk gives up and returns `None`; the caller repaints the whole list.
//! The result is an ordered script whose indices refer to the evolving list,
//! so applying the entries in order reproduces the new list exactly.

use std::collections::HashMap;

use tracing::debug;

use gridflow_core::logging::targets;

use crate::row::{RowChangeKind, RowItem, RowKey, RowKind};

/// One entry of the edit script produced by [`find_changes`].
#[derive(Debug, Clone)]
pub struct FoundChange {
    pub kind: RowChangeKind,
    /// Position in the evolving list at the moment this entry applies.
    pub index: usize,
    /// The new row for inserts and updates; the removed row for removes.
    pub item: RowItem,
    /// The previous row, present for updates.
    pub old_item: Option<RowItem>,
}

/// Compute the minimal edit script turning `old` into `new`.
///
/// Returns `None` when the lists are related by a multi-row reorder the
/// single-lookahead walk cannot express; callers fall back to a full refresh.
/// Rows that match by key but compare equal per [`is_item_equals`] produce no
/// entry.
pub fn find_changes(old: &[RowItem], new: &[RowItem]) -> Option<Vec<FoundChange>> {
    let old_index_by_key: HashMap<RowKey, usize> = old
        .iter()
        .enumerate()
        .map(|(i, row)| (row.diff_key(), i))
        .collect();
    let new_index_by_key: HashMap<RowKey, usize> = new
        .iter()
        .enumerate()
        .map(|(i, row)| (row.diff_key(), i))
        .collect();

    let mut changes = Vec::new();
    let mut oi = 0;
    let mut ni = 0;

    while oi < old.len() || ni < new.len() {
        if ni >= new.len() {
            changes.push(FoundChange {
                kind: RowChangeKind::Remove,
                index: ni,
                item: old[oi].clone(),
                old_item: None,
            });
            oi += 1;
            continue;
        }
        if oi >= old.len() {
            changes.push(FoundChange {
                kind: RowChangeKind::Insert,
                index: ni,
                item: new[ni].clone(),
                old_item: None,
            });
            ni += 1;
            continue;
        }

        let old_key = old[oi].diff_key();
        let new_key = new[ni].diff_key();

        if old_key == new_key {
            if !is_item_equals(&old[oi], &new[ni]) {
                changes.push(FoundChange {
                    kind: RowChangeKind::Update,
                    index: ni,
                    item: new[ni].clone(),
                    old_item: Some(old[oi].clone()),
                });
            }
            oi += 1;
            ni += 1;
        } else if new.get(ni + 1).map(RowItem::diff_key) == Some(old_key.clone()) {
            // The current old row reappears one step later: one row inserted.
            changes.push(FoundChange {
                kind: RowChangeKind::Insert,
                index: ni,
                item: new[ni].clone(),
                old_item: None,
            });
            ni += 1;
        } else if old.get(oi + 1).map(RowItem::diff_key) == Some(new_key.clone()) {
            // The current new row is one step later in old: one row removed.
            changes.push(FoundChange {
                kind: RowChangeKind::Remove,
                index: ni,
                item: old[oi].clone(),
                old_item: None,
            });
            oi += 1;
        } else {
            let old_key_in_new = new_index_by_key.contains_key(&old_key);
            let new_key_in_old = old_index_by_key.contains_key(&new_key);
            if old_key_in_new && new_key_in_old {
                debug!(
                    target: targets::DIFF,
                    old_index = oi,
                    new_index = ni,
                    "edit script inconclusive, rows moved past each other"
                );
                return None;
            }
            if !old_key_in_new {
                changes.push(FoundChange {
                    kind: RowChangeKind::Remove,
                    index: ni,
                    item: old[oi].clone(),
                    old_item: None,
                });
                oi += 1;
            } else {
                changes.push(FoundChange {
                    kind: RowChangeKind::Insert,
                    index: ni,
                    item: new[ni].clone(),
                    old_item: None,
                });
                ni += 1;
            }
        }
    }

    Some(changes)
}

/// Whether two rows with the same key would render identically.
pub fn is_item_equals(a: &RowItem, b: &RowItem) -> bool {
    a.kind == b.kind
        && a.visible == b.visible
        && a.is_editing == b.is_editing
        && a.is_expanded == b.is_expanded
        && a.values == b.values
        && a.modified_values == b.modified_values
}

/// Column information the cell diff needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnDiffOptions<'a> {
    /// Per visible column, whether it is an expand-control column.
    pub expand_control: &'a [bool],
    /// The host renders whole rows through a template; per-cell repainting
    /// is meaningless and every update repaints the full row.
    pub row_template: bool,
}

/// Which columns of an updated row actually changed.
///
/// `None` means the whole row must repaint; `Some(indices)` restricts the
/// repaint to those cells (possibly none, for detail rows whose content the
/// host owns).
pub fn changed_column_indices(
    old: &RowItem,
    new: &RowItem,
    options: &ColumnDiffOptions<'_>,
) -> Option<Vec<usize>> {
    if old.kind != new.kind || options.row_template {
        return None;
    }

    match new.kind {
        RowKind::Detail => Some(Vec::new()),
        RowKind::Group | RowKind::GroupFooter => {
            if old.is_expanded != new.is_expanded {
                return None;
            }
            // Expand state unchanged, so only the content cells can differ.
            Some(
                options
                    .expand_control
                    .iter()
                    .enumerate()
                    .filter(|(_, is_expand)| !**is_expand)
                    .map(|(i, _)| i)
                    .collect(),
            )
        }
        RowKind::Data => {
            let columns = options.expand_control.len().max(new.values.len());
            let mut indices = Vec::new();
            for i in 0..columns {
                if is_cell_changed(old, new, i) {
                    indices.push(i);
                }
            }
            Some(indices)
        }
    }
}

fn is_cell_changed(old: &RowItem, new: &RowItem, column: usize) -> bool {
    if old.values.get(column) != new.values.get(column) {
        return true;
    }
    let old_modified = old
        .modified_values
        .as_ref()
        .and_then(|m| m.get(column))
        .is_some_and(Option::is_some);
    let new_modified = new
        .modified_values
        .as_ref()
        .and_then(|m| m.get(column))
        .is_some_and(Option::is_some);
    old_modified != new_modified
}
