//! The reconciliation controller: materialized list ownership and change
//! emission.
//!
//! [`DataController`] owns the only materialized [`RowItem`] list. It projects
//! the source's raw items through the visible columns, compares successive
//! materializations with the diff engine, and emits [`Change`] descriptors the
//! rendering layer consumes once. Everything that mutates the list funnels
//! through [`update_items`](DataController::update_items), so batched and
//! push-driven updates coalesce under one rule and cannot race each other
//! into inconsistent row indices.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, trace};

use gridflow_core::logging::targets;
use gridflow_core::{ConnectionGuard, Signal, SignalExt};

use crate::diff::{changed_column_indices, find_changes, is_item_equals, ColumnDiffOptions};
use crate::error::{DataError, Result};
use crate::row::{Change, OperationTypes, RowChangeKind, RowItem, RowKey, RowKind};
use crate::source::{DataSource, SourceChange};
use crate::store::key_of;

/// One visible column: how a cell value is derived from a row payload.
#[derive(Clone)]
pub struct Column {
    /// Field path projected into the cell, unless `value_fn` overrides it.
    pub data_field: Option<String>,
    /// Computed cell value.
    pub value_fn: Option<Arc<dyn Fn(&Value) -> Value + Send + Sync>>,
    /// The column renders group expand controls, not data.
    pub is_expand_control: bool,
}

impl Column {
    pub fn field(data_field: impl Into<String>) -> Self {
        Self {
            data_field: Some(data_field.into()),
            value_fn: None,
            is_expand_control: false,
        }
    }

    pub fn computed<F>(value_fn: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self {
            data_field: None,
            value_fn: Some(Arc::new(value_fn)),
            is_expand_control: false,
        }
    }

    pub fn expand_control() -> Self {
        Self {
            data_field: None,
            value_fn: None,
            is_expand_control: true,
        }
    }

    fn value(&self, data: &Value) -> Value {
        if let Some(value_fn) = &self.value_fn {
            return value_fn(data);
        }
        match &self.data_field {
            Some(field) => crate::query::field_value(data, field),
            None => Value::Null,
        }
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("data_field", &self.data_field)
            .field("computed", &self.value_fn.is_some())
            .field("is_expand_control", &self.is_expand_control)
            .finish()
    }
}

/// Static behavior switches of a [`DataController`].
#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    /// Prefer minimal diffs over full replaces when a load commits.
    pub repaint_changes_only: bool,
    /// The host renders whole rows through a template, so per-cell diffs are
    /// pointless.
    pub row_template: bool,
}

/// What [`DataController::refresh`] should do.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshOptions {
    /// Go back to the store instead of re-projecting current items.
    pub reload: bool,
    /// Restrict the resulting repaint to the minimal diff.
    pub changes_only: bool,
}

/// Paging and search state a host may persist across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    pub page_index: usize,
    /// `None` when the source runs in variable-size/continuation mode.
    pub page_size: Option<usize>,
    pub search_text: String,
}

/// Callback correcting row-index-based external references (scroll anchors)
/// after a pass. Receives a resolver from old row index to index delta;
/// `None` means the row left the list.
pub type RowIndexCorrector = Box<dyn Fn(&dyn Fn(usize) -> Option<isize>) + Send + Sync>;

enum ChangeRequest {
    Refresh {
        repaint_changes_only: bool,
        operation_types: Option<OperationTypes>,
        need_update_dimensions: bool,
    },
    Update {
        row_indices: Vec<usize>,
        changes_only: bool,
    },
}

#[derive(Default)]
struct UpdateLock {
    count: usize,
    queued: Vec<ChangeRequest>,
}

struct SourceGuards {
    _changed: ConnectionGuard<SourceChange>,
    _loading: ConnectionGuard<bool>,
    _error: ConnectionGuard<DataError>,
}

/// The orchestrator: owns the materialized list and the change pipeline.
pub struct DataController {
    source: Arc<DataSource>,
    config: ControllerConfig,
    columns: RwLock<Vec<Column>>,
    items: RwLock<Vec<RowItem>>,
    processed_cache: Mutex<Option<Vec<RowItem>>>,
    update_lock: Mutex<UpdateLock>,
    changed: Arc<Signal<Change>>,
    page_changed: Arc<Signal<()>>,
    loading_changed: Arc<Signal<bool>>,
    error_occurred: Arc<Signal<DataError>>,
    row_index_corrector: Mutex<Option<RowIndexCorrector>>,
    custom_loading: Mutex<usize>,
    disposed: AtomicBool,
    guards: Mutex<Option<SourceGuards>>,
}

impl DataController {
    pub fn new(source: Arc<DataSource>, columns: Vec<Column>, config: ControllerConfig) -> Arc<Self> {
        let controller = Arc::new(Self {
            source,
            config,
            columns: RwLock::new(columns),
            items: RwLock::new(Vec::new()),
            processed_cache: Mutex::new(None),
            update_lock: Mutex::new(UpdateLock::default()),
            changed: Arc::new(Signal::new()),
            page_changed: Arc::new(Signal::new()),
            loading_changed: Arc::new(Signal::new()),
            error_occurred: Arc::new(Signal::new()),
            row_index_corrector: Mutex::new(None),
            custom_loading: Mutex::new(0),
            disposed: AtomicBool::new(false),
            guards: Mutex::new(None),
        });

        let weak = Arc::downgrade(&controller);
        let changed_guard = controller
            .source
            .changed()
            .connect_guarded(move |change: &SourceChange| {
                if let Some(controller) = weak.upgrade() {
                    controller.handle_source_changed(change);
                }
            });

        let weak = Arc::downgrade(&controller);
        let loading_guard = controller
            .source
            .loading_changed()
            .connect_guarded(move |_: &bool| {
                if let Some(controller) = weak.upgrade() {
                    controller.loading_changed.emit(controller.is_loading());
                }
            });

        let weak = Arc::downgrade(&controller);
        let error_guard = controller
            .source
            .load_error()
            .connect_guarded(move |err: &DataError| {
                if let Some(controller) = weak.upgrade() {
                    controller.error_occurred.emit(err.clone());
                }
            });

        *controller.guards.lock() = Some(SourceGuards {
            _changed: changed_guard,
            _loading: loading_guard,
            _error: error_guard,
        });

        controller
    }

    // ---- signals ----

    /// Emitted once per reconciliation pass with the change descriptor.
    pub fn changed(&self) -> &Arc<Signal<Change>> {
        &self.changed
    }

    /// Emitted when the visible page moved (paging, page size, filtering).
    pub fn page_changed(&self) -> &Arc<Signal<()>> {
        &self.page_changed
    }

    pub fn loading_changed(&self) -> &Arc<Signal<bool>> {
        &self.loading_changed
    }

    /// Emitted exactly once per failed load; the list stays unchanged.
    pub fn error_occurred(&self) -> &Arc<Signal<DataError>> {
        &self.error_occurred
    }

    // ---- accessors ----

    pub fn source(&self) -> &Arc<DataSource> {
        &self.source
    }

    /// Snapshot of the materialized list, valid until the next change event.
    pub fn items(&self) -> Vec<RowItem> {
        self.items.read().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.source.is_loading() || *self.custom_loading.lock() > 0
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn key_of(&self, data: &Value) -> Value {
        key_of(self.source.store().key_fields(), data)
    }

    pub fn get_key_by_row_index(&self, row_index: usize) -> Option<Value> {
        self.items.read().get(row_index).map(|item| item.key.clone())
    }

    pub fn get_row_index_by_key(&self, key: &Value) -> Option<usize> {
        self.items.read().iter().position(|item| item.key == *key)
    }

    pub fn by_key(&self, key: &Value) -> Result<Value> {
        self.source.by_key(key)
    }

    // ---- configuration ----

    pub fn set_columns(&self, columns: Vec<Column>) {
        *self.columns.write() = columns;
        *self.processed_cache.lock() = None;
    }

    /// Install the host's row-index correction callback, invoked once per
    /// reconciliation pass.
    pub fn set_row_index_corrector(&self, corrector: RowIndexCorrector) {
        *self.row_index_corrector.lock() = Some(corrector);
    }

    // ---- loading ----

    /// Issue the initial (or a plain) load of the current window.
    pub fn load(&self) {
        if !self.is_disposed() {
            self.source.load();
        }
    }

    /// Re-materialize the view.
    ///
    /// With `reload` the store is asked again and the repaint preference
    /// rides along to the resulting change; without it the current source
    /// items are re-projected and diffed locally.
    pub fn refresh(&self, options: RefreshOptions) {
        if self.is_disposed() {
            return;
        }
        if options.reload {
            self.source.reload_with_repaint(Some(options.changes_only));
        } else {
            *self.processed_cache.lock() = None;
            self.update_items(ChangeRequest::Refresh {
                repaint_changes_only: options.changes_only,
                operation_types: None,
                need_update_dimensions: false,
            });
        }
    }

    /// Repaint specific rows, optionally restricted to their changed cells.
    pub fn repaint_rows(&self, row_indices: Vec<usize>, changes_only: bool) {
        if self.is_disposed() {
            return;
        }
        self.update_items(ChangeRequest::Update {
            row_indices,
            changes_only,
        });
    }

    /// Enter a host-driven loading bracket (e.g. while exporting).
    pub fn begin_custom_loading(&self) {
        let became = {
            let mut count = self.custom_loading.lock();
            *count += 1;
            *count == 1
        };
        if became && !self.source.is_loading() {
            self.loading_changed.emit(true);
        }
    }

    pub fn end_custom_loading(&self) {
        let cleared = {
            let mut count = self.custom_loading.lock();
            *count = count.saturating_sub(1);
            *count == 0
        };
        if cleared && !self.source.is_loading() {
            self.loading_changed.emit(false);
        }
    }

    // ---- update batching ----

    /// Open an update-batching scope; changes queue until the matching
    /// [`end_update`](Self::end_update).
    pub fn begin_update(&self) {
        self.update_lock.lock().count += 1;
    }

    /// Close the batching scope; queued changes coalesce into one pass.
    pub fn end_update(&self) {
        let pending = {
            let mut lock = self.update_lock.lock();
            lock.count = lock.count.saturating_sub(1);
            if lock.count == 0 {
                std::mem::take(&mut lock.queued)
            } else {
                Vec::new()
            }
        };
        match pending.len() {
            0 => {}
            1 => {
                if let Some(request) = pending.into_iter().next() {
                    self.process_request(request);
                }
            }
            _ => self.process_request(Self::merge_requests(pending)),
        }
    }

    /// Coalesce queued changes: the merged pass repaints minimally only when
    /// every queued change individually asked for it.
    fn merge_requests(pending: Vec<ChangeRequest>) -> ChangeRequest {
        let mut repaint = true;
        let mut need_update_dimensions = false;
        let mut merged_ops: Option<OperationTypes> = None;
        for request in &pending {
            match request {
                ChangeRequest::Refresh {
                    repaint_changes_only,
                    operation_types,
                    need_update_dimensions: need_dims,
                } => {
                    repaint &= *repaint_changes_only;
                    need_update_dimensions |= *need_dims;
                    if let Some(ops) = operation_types {
                        let acc = merged_ops.get_or_insert_with(OperationTypes::default);
                        acc.reload |= ops.reload;
                        acc.filtering |= ops.filtering;
                        acc.sorting |= ops.sorting;
                        acc.grouping |= ops.grouping;
                        acc.paging |= ops.paging;
                        acc.page_size |= ops.page_size;
                    }
                }
                ChangeRequest::Update { changes_only, .. } => {
                    repaint &= *changes_only;
                }
            }
        }
        ChangeRequest::Refresh {
            repaint_changes_only: repaint,
            operation_types: merged_ops,
            need_update_dimensions,
        }
    }

    fn update_items(&self, request: ChangeRequest) {
        if self.is_disposed() {
            return;
        }
        {
            let mut lock = self.update_lock.lock();
            if lock.count > 0 {
                lock.queued.push(request);
                return;
            }
        }
        self.process_request(request);
    }

    fn process_request(&self, request: ChangeRequest) {
        if let Some(change) = self.update_items_core(request) {
            self.changed.emit(change);
        }
    }

    // ---- source event handling ----

    fn handle_source_changed(&self, source_change: &SourceChange) {
        if self.is_disposed() {
            return;
        }
        *self.processed_cache.lock() = None;

        if source_change.push_changes.is_some() {
            self.update_items(ChangeRequest::Refresh {
                repaint_changes_only: true,
                operation_types: None,
                need_update_dimensions: false,
            });
            return;
        }

        let ops = source_change.operation_types;
        let repaint = source_change.repaint_changes_only.unwrap_or(
            self.config.repaint_changes_only && !ops.grouping && !ops.filtering,
        );
        self.update_items(ChangeRequest::Refresh {
            repaint_changes_only: repaint,
            operation_types: Some(ops),
            need_update_dimensions: ops.reload || ops.paging || ops.page_size,
        });

        if ops.paging || ops.page_size || ops.filtering {
            self.page_changed.emit(());
        }
    }

    // ---- materialization ----

    fn update_items_core(&self, request: ChangeRequest) -> Option<Change> {
        let new_items = self.process_items();
        let old_items = self.items.read().clone();

        let mut change = match request {
            ChangeRequest::Refresh {
                repaint_changes_only,
                operation_types,
                need_update_dimensions,
            } => {
                let mut change = if repaint_changes_only && !old_items.is_empty() {
                    self.changes_only_refresh(&old_items, &new_items)
                } else {
                    Change::refresh(new_items.clone())
                };
                change.operation_types = operation_types;
                change.need_update_dimensions = need_update_dimensions;
                change
            }
            ChangeRequest::Update {
                row_indices,
                changes_only,
            } => {
                if changes_only {
                    self.affected_region_update(&old_items, &new_items, &row_indices)
                } else {
                    let mut change = Change::update();
                    change.repaint_changes_only = false;
                    let mut sorted = row_indices;
                    sorted.sort_unstable();
                    sorted.dedup();
                    for index in sorted {
                        if let Some(item) = new_items.get(index) {
                            change.push_entry(index, RowChangeKind::Update, item.clone(), None);
                        }
                    }
                    change
                }
            }
        };

        self.run_row_index_corrector(&old_items, &new_items);
        *self.items.write() = new_items;

        if change.is_empty() && change.kind == crate::row::ChangeKind::Update {
            trace!(target: targets::CONTROLLER, "pass produced no visible changes");
        }
        Some(change)
    }

    /// Diff-based refresh; falls back to a full replace when the edit script
    /// is inconclusive.
    fn changes_only_refresh(&self, old_items: &[RowItem], new_items: &[RowItem]) -> Change {
        let Some(script) = find_changes(old_items, new_items) else {
            debug!(
                target: targets::CONTROLLER,
                "diff inconclusive, replacing materialized list"
            );
            return Change::refresh(new_items.to_vec());
        };

        let diff_options = self.column_diff_options();
        let mut change = Change::update();
        for entry in script {
            let column_indices = match (entry.kind, &entry.old_item) {
                (RowChangeKind::Update, Some(old)) => {
                    changed_column_indices(old, &entry.item, &diff_options.as_ref())
                }
                _ => None,
            };
            change.push_entry(entry.index, entry.kind, entry.item, column_indices);
        }
        change
    }

    /// Walk only the requested indices, cascading through the shifted region
    /// an insert or remove opens up.
    fn affected_region_update(
        &self,
        old_items: &[RowItem],
        new_items: &[RowItem],
        row_indices: &[usize],
    ) -> Change {
        let diff_options = self.column_diff_options();
        let diff_options = diff_options.as_ref();
        let mut change = Change::update();

        let mut requested: Vec<usize> = row_indices.to_vec();
        requested.sort_unstable();
        requested.dedup();

        // ni - oi, carried across requested indices once a cascade settles.
        let mut delta: isize = 0;
        // Old indices at or below this were consumed by an earlier cascade.
        let mut consumed_old: usize = 0;

        let loose = |a: Option<&RowItem>, b: Option<&RowItem>| {
            matches!((a, b), (Some(a), Some(b)) if a.diff_key() == b.diff_key())
        };

        for &idx in &requested {
            if idx < consumed_old {
                continue;
            }
            let mut oi = idx;
            let mut ni = (idx as isize + delta).max(0) as usize;

            loop {
                let old_item = old_items.get(oi);
                let new_item = new_items.get(ni);
                match (old_item, new_item) {
                    (None, None) => break,
                    _ => {}
                }

                let strict = loose(old_item, old_items.get(oi + 1))
                    || loose(new_item, new_items.get(ni + 1));
                // Strict matching (neighbors sharing keys) additionally pins
                // the editing state of detail rows; the row kind is already
                // part of the diff key.
                let matched = match (old_item, new_item) {
                    (Some(old), Some(new)) => {
                        old.diff_key() == new.diff_key()
                            && (!strict
                                || old.kind != RowKind::Detail
                                || old.is_editing == new.is_editing)
                    }
                    _ => false,
                };

                if matched {
                    let (old, new) = (old_items[oi].clone(), new_items[ni].clone());
                    if !is_item_equals(&old, &new) {
                        let columns = changed_column_indices(&old, &new, &diff_options);
                        change.push_entry(ni, RowChangeKind::Update, new, columns);
                    }
                    oi += 1;
                    ni += 1;
                    break;
                }

                if new_item.is_some()
                    && (old_item.is_none() || loose(old_item, new_items.get(ni + 1)))
                {
                    change.push_entry(ni, RowChangeKind::Insert, new_items[ni].clone(), None);
                    ni += 1;
                    continue;
                }

                if old_item.is_some()
                    && (new_item.is_none() || loose(old_items.get(oi + 1), new_item))
                {
                    change.push_entry(ni, RowChangeKind::Remove, old_items[oi].clone(), None);
                    oi += 1;
                    continue;
                }

                // Keys differ with no lookahead match: treat as an in-place
                // update of the whole row.
                change.push_entry(ni, RowChangeKind::Update, new_items[ni].clone(), None);
                oi += 1;
                ni += 1;
                break;
            }

            consumed_old = oi;
            delta = ni as isize - oi as isize;
        }

        change
    }

    fn column_diff_options(&self) -> OwnedColumnDiffOptions {
        let columns = self.columns.read();
        OwnedColumnDiffOptions {
            expand_control: columns.iter().map(|c| c.is_expand_control).collect(),
            row_template: self.config.row_template,
        }
    }

    fn run_row_index_corrector(&self, old_items: &[RowItem], new_items: &[RowItem]) {
        let corrector = self.row_index_corrector.lock();
        let Some(corrector) = corrector.as_ref() else {
            return;
        };
        let new_index_by_key: HashMap<RowKey, usize> = new_items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.diff_key(), i))
            .collect();
        let resolver = |old_index: usize| -> Option<isize> {
            let item = old_items.get(old_index)?;
            let new_index = *new_index_by_key.get(&item.diff_key())?;
            Some(new_index as isize - old_index as isize)
        };
        corrector(&resolver);
    }

    /// Project the source's current items into row items with sequential
    /// indices. Results are cached until the source changes.
    fn process_items(&self) -> Vec<RowItem> {
        if let Some(cached) = self.processed_cache.lock().clone() {
            return cached;
        }

        let columns = self.columns.read().clone();
        let key_fields = self.source.store().key_fields().to_vec();
        let mut items = Vec::new();
        let mut group_path = Vec::new();
        Self::build_rows(
            &self.source.items(),
            &columns,
            &key_fields,
            &mut group_path,
            &mut items,
        );
        for (index, item) in items.iter_mut().enumerate() {
            item.row_index = index;
        }

        *self.processed_cache.lock() = Some(items.clone());
        items
    }

    fn build_rows(
        values: &[Value],
        columns: &[Column],
        key_fields: &[String],
        group_path: &mut Vec<Value>,
        out: &mut Vec<RowItem>,
    ) {
        for value in values {
            let group_children = value
                .get("items")
                .and_then(Value::as_array)
                .filter(|_| value.get("key").is_some());
            match group_children {
                Some(children) => {
                    let group_key = value.get("key").cloned().unwrap_or(Value::Null);
                    group_path.push(group_key.clone());
                    let mut row =
                        RowItem::group_row(json!(group_path.clone()), value.clone(), true);
                    row.values = columns
                        .iter()
                        .map(|column| {
                            if column.is_expand_control {
                                Value::Null
                            } else {
                                group_key.clone()
                            }
                        })
                        .collect();
                    out.push(row);
                    Self::build_rows(children, columns, key_fields, group_path, out);
                    group_path.pop();
                }
                None => {
                    let mut row = RowItem::data_row(key_of(key_fields, value), value.clone());
                    row.values = columns.iter().map(|column| column.value(value)).collect();
                    out.push(row);
                }
            }
        }
    }

    // ---- persisted state ----

    /// The state a host serializes for session restoration.
    pub fn user_state(&self) -> UserState {
        UserState {
            page_index: self.source.page_index(),
            page_size: self.source.page_size(),
            search_text: self.source.search_text(),
        }
    }

    /// Restore previously persisted state. The resulting loads coalesce into
    /// one visible pass.
    pub fn apply_user_state(&self, state: &UserState) {
        if self.is_disposed() {
            return;
        }
        self.begin_update();
        self.source.set_search_text(state.search_text.clone());
        if let Some(size) = state.page_size {
            self.source.set_page_size(size);
        }
        self.source.set_page_index(state.page_index);
        self.end_update();
    }

    // ---- teardown ----

    /// Tear the controller down synchronously: cancel loads, detach from the
    /// source, clear the list. No late callback observes a populated
    /// controller afterwards.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.guards.lock() = None;
        self.source.dispose();
        self.items.write().clear();
        *self.processed_cache.lock() = None;
        self.update_lock.lock().queued.clear();
        self.changed.disconnect_all();
        self.page_changed.disconnect_all();
        self.loading_changed.disconnect_all();
        self.error_occurred.disconnect_all();
        debug!(target: targets::CONTROLLER, "controller disposed");
    }
}

/// Owned buffer behind [`ColumnDiffOptions`], which borrows its slices.
struct OwnedColumnDiffOptions {
    expand_control: Vec<bool>,
    row_template: bool,
}

impl OwnedColumnDiffOptions {
    fn as_ref(&self) -> ColumnDiffOptions<'_> {
        ColumnDiffOptions {
            expand_control: &self.expand_control,
            row_template: self.row_template,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{CmpOp, Filter, GroupSpec};
    use crate::row::ChangeKind;
    use crate::source::SourceConfig;
    use crate::store::{ArrayStore, PushChange};

    fn people() -> Vec<Value> {
        (1..=5)
            .map(|i| {
                json!({
                    "id": i,
                    "name": format!("P{}", i),
                    "team": if i % 2 == 0 { "even" } else { "odd" },
                })
            })
            .collect()
    }

    fn controller_with(config: ControllerConfig, source_config: SourceConfig) -> Arc<DataController> {
        let store = Arc::new(ArrayStore::new(people(), vec!["id".to_owned()]));
        let source = DataSource::new(store, source_config);
        DataController::new(
            source,
            vec![Column::field("name"), Column::field("team")],
            config,
        )
    }

    fn collect_changes(controller: &Arc<DataController>) -> Arc<Mutex<Vec<Change>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let slot = Arc::clone(&seen);
        controller.changed().connect(move |change: &Change| {
            slot.lock().push(change.clone());
        });
        seen
    }

    #[test]
    fn test_initial_load_materializes_rows() {
        let controller = controller_with(
            ControllerConfig::default(),
            SourceConfig {
                page_size: Some(10),
                ..Default::default()
            },
        );
        let seen = collect_changes(&controller);
        controller.load();

        let items = controller.items();
        assert_eq!(items.len(), 5);
        assert_eq!(items[0].key, json!(1));
        assert_eq!(items[0].values, vec![json!("P1"), json!("odd")]);
        assert_eq!(items[4].row_index, 4);

        let changes = seen.lock();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Refresh);
        assert!(changes[0].need_update_dimensions);
    }

    #[test]
    fn test_push_produces_minimal_update() {
        let controller = controller_with(
            ControllerConfig {
                repaint_changes_only: true,
                ..Default::default()
            },
            SourceConfig {
                page_size: Some(10),
                ..Default::default()
            },
        );
        controller.load();
        let seen = collect_changes(&controller);

        controller.source().store().push(&[PushChange::Update {
            key: json!(2),
            data: json!({"name": "renamed"}),
        }]);

        let changes = seen.lock();
        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert_eq!(change.kind, ChangeKind::Update);
        assert_eq!(change.len(), 1);
        assert_eq!(change.row_indices, vec![1]);
        assert_eq!(change.change_types, vec![RowChangeKind::Update]);
        // Only the name column is dirty.
        assert_eq!(change.column_indices[0], Some(vec![0]));
        assert_eq!(controller.items()[1].values[0], json!("renamed"));
    }

    #[test]
    fn test_remove_push_produces_remove_entry() {
        let controller = controller_with(
            ControllerConfig {
                repaint_changes_only: true,
                ..Default::default()
            },
            SourceConfig {
                page_size: Some(10),
                ..Default::default()
            },
        );
        controller.load();
        let seen = collect_changes(&controller);

        controller
            .source()
            .store()
            .push(&[PushChange::Remove { key: json!(2) }]);

        let changes = seen.lock();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_types, vec![RowChangeKind::Remove]);
        assert_eq!(changes[0].row_indices, vec![1]);
        assert_eq!(controller.items().len(), 4);
        assert_eq!(controller.get_row_index_by_key(&json!(3)), Some(1));
    }

    #[test]
    fn test_filtering_forces_full_refresh_even_with_repaint_option() {
        let controller = controller_with(
            ControllerConfig {
                repaint_changes_only: true,
                ..Default::default()
            },
            SourceConfig {
                page_size: Some(10),
                ..Default::default()
            },
        );
        controller.load();
        let seen = collect_changes(&controller);
        let pages = Arc::new(Mutex::new(0usize));
        let pages_slot = Arc::clone(&pages);
        controller.page_changed().connect(move |_: &()| {
            *pages_slot.lock() += 1;
        });

        controller
            .source()
            .set_filter(Some(Filter::cmp("team", CmpOp::Eq, json!("odd"))));

        let changes = seen.lock();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Refresh);
        assert_eq!(*pages.lock(), 1);
        assert_eq!(controller.items().len(), 3);
    }

    #[test]
    fn test_update_batching_coalesces() {
        let controller = controller_with(
            ControllerConfig {
                repaint_changes_only: true,
                ..Default::default()
            },
            SourceConfig {
                page_size: Some(10),
                ..Default::default()
            },
        );
        controller.load();
        let seen = collect_changes(&controller);

        controller.begin_update();
        controller.source().store().push(&[PushChange::Update {
            key: json!(1),
            data: json!({"name": "first"}),
        }]);
        controller.source().store().push(&[PushChange::Update {
            key: json!(2),
            data: json!({"name": "second"}),
        }]);
        assert!(seen.lock().is_empty());
        controller.end_update();

        let changes = seen.lock();
        assert_eq!(changes.len(), 1);
        // Both queued passes wanted a minimal repaint, so the merged one is.
        assert_eq!(changes[0].kind, ChangeKind::Update);
        assert_eq!(changes[0].len(), 2);
    }

    #[test]
    fn test_batched_full_request_forces_full_replace() {
        let controller = controller_with(
            ControllerConfig {
                repaint_changes_only: true,
                ..Default::default()
            },
            SourceConfig {
                page_size: Some(10),
                ..Default::default()
            },
        );
        controller.load();
        let seen = collect_changes(&controller);

        controller.begin_update();
        controller.source().store().push(&[PushChange::Update {
            key: json!(1),
            data: json!({"name": "first"}),
        }]);
        controller.refresh(RefreshOptions {
            reload: false,
            changes_only: false,
        });
        controller.end_update();

        let changes = seen.lock();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Refresh);
    }

    #[test]
    fn test_repaint_rows_full() {
        let controller = controller_with(
            ControllerConfig::default(),
            SourceConfig {
                page_size: Some(10),
                ..Default::default()
            },
        );
        controller.load();
        let seen = collect_changes(&controller);

        controller.repaint_rows(vec![3, 1, 1], false);

        let changes = seen.lock();
        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert_eq!(change.kind, ChangeKind::Update);
        assert!(!change.repaint_changes_only);
        assert_eq!(change.row_indices, vec![1, 3]);
        assert_eq!(change.column_indices, vec![None, None]);
    }

    #[test]
    fn test_repaint_rows_changes_only_skips_equal_rows() {
        let controller = controller_with(
            ControllerConfig::default(),
            SourceConfig {
                page_size: Some(10),
                ..Default::default()
            },
        );
        controller.load();
        let seen = collect_changes(&controller);

        // Nothing changed underneath, so a changes-only repaint is empty.
        controller.repaint_rows(vec![0, 2], true);
        assert!(seen.lock()[0].is_empty());
    }

    #[test]
    fn test_grouped_push_update_keeps_group_structure() {
        let store = Arc::new(ArrayStore::new(people(), vec!["id".to_owned()]));
        let source = DataSource::new(
            store,
            SourceConfig {
                page_size: Some(10),
                ..Default::default()
            },
        );
        let controller = DataController::new(
            source,
            vec![Column::expand_control(), Column::field("name")],
            ControllerConfig {
                repaint_changes_only: true,
                ..Default::default()
            },
        );
        controller.load();
        controller.source().set_group(vec![GroupSpec::by("team")]);

        let before: Vec<RowKey> = controller.items().iter().map(RowItem::diff_key).collect();
        let seen = collect_changes(&controller);

        controller.source().store().push(&[PushChange::Update {
            key: json!(2),
            data: json!({"name": "renamed"}),
        }]);

        let changes = seen.lock();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_types, vec![RowChangeKind::Update]);
        // Group membership and ordering are untouched.
        let after: Vec<RowKey> = controller.items().iter().map(RowItem::diff_key).collect();
        assert_eq!(before, after);
        // The expand-control column stays clean.
        assert_eq!(changes[0].column_indices[0], Some(vec![1]));
    }

    #[test]
    fn test_row_index_corrector_runs_once_per_pass() {
        let controller = controller_with(
            ControllerConfig {
                repaint_changes_only: true,
                ..Default::default()
            },
            SourceConfig {
                page_size: Some(10),
                ..Default::default()
            },
        );
        controller.load();

        let observed = Arc::new(Mutex::new(Vec::new()));
        let slot = Arc::clone(&observed);
        controller.set_row_index_corrector(Box::new(move |resolve| {
            slot.lock().push(resolve(4));
        }));

        // Row 1 (key 2) disappears; the anchor at old index 4 moves up one.
        controller
            .source()
            .store()
            .push(&[PushChange::Remove { key: json!(2) }]);

        assert_eq!(*observed.lock(), vec![Some(-1)]);
    }

    #[test]
    fn test_user_state_roundtrip() {
        let controller = controller_with(
            ControllerConfig::default(),
            SourceConfig {
                page_size: Some(2),
                search_fields: vec!["name".to_owned()],
                ..Default::default()
            },
        );
        controller.load();
        controller.source().set_page_index(1);

        let state = controller.user_state();
        assert_eq!(state.page_index, 1);
        assert_eq!(state.page_size, Some(2));

        let serialized = serde_json::to_string(&state).unwrap();
        let restored: UserState = serde_json::from_str(&serialized).unwrap();
        assert_eq!(restored, state);

        controller.apply_user_state(&UserState {
            page_index: 0,
            page_size: Some(3),
            search_text: String::new(),
        });
        assert_eq!(controller.source().page_index(), 0);
        assert_eq!(controller.source().page_size(), Some(3));
    }

    #[test]
    fn test_custom_loading_bracket() {
        let controller = controller_with(
            ControllerConfig::default(),
            SourceConfig {
                page_size: Some(10),
                ..Default::default()
            },
        );
        controller.load();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let slot = Arc::clone(&seen);
        controller.loading_changed().connect(move |&loading: &bool| {
            slot.lock().push(loading);
        });

        controller.begin_custom_loading();
        assert!(controller.is_loading());
        controller.begin_custom_loading();
        controller.end_custom_loading();
        // Still inside the outer bracket.
        assert!(controller.is_loading());
        controller.end_custom_loading();
        assert!(!controller.is_loading());

        assert_eq!(*seen.lock(), vec![true, false]);
    }

    #[test]
    fn test_dispose_is_terminal() {
        let controller = controller_with(
            ControllerConfig::default(),
            SourceConfig {
                page_size: Some(10),
                ..Default::default()
            },
        );
        controller.load();
        let seen = collect_changes(&controller);

        controller.dispose();
        assert!(controller.is_disposed());
        assert!(controller.items().is_empty());

        controller.load();
        controller.refresh(RefreshOptions::default());
        controller.repaint_rows(vec![0], true);
        controller
            .source()
            .store()
            .push(&[PushChange::Remove { key: json!(1) }]);
        assert!(seen.lock().is_empty());

        controller.dispose();
    }

    #[test]
    fn test_shifted_rows_with_duplicate_neighbor_keys_stay_matched() {
        let controller = controller_with(
            ControllerConfig::default(),
            SourceConfig {
                page_size: Some(10),
                ..Default::default()
            },
        );

        let row = |key: i64, name: &str, row_index: usize| {
            let mut item = RowItem::data_row(json!(key), json!({"id": key, "name": name}));
            item.values = vec![json!(name), json!("odd")];
            item.row_index = row_index;
            item
        };
        // Neighbors share a key, so the walk matches strictly.
        let old = vec![row(2, "b1", 0), row(2, "b2", 1)];
        let new = vec![row(9, "n", 0), row(2, "b1", 1), row(2, "b2", 2)];

        let change = controller.affected_region_update(&old, &new, &[0]);

        // A top insert only shifts the duplicates; they must not be rewritten
        // as insert/remove pairs.
        assert_eq!(change.len(), 1);
        assert_eq!(change.change_types, vec![RowChangeKind::Insert]);
        assert_eq!(change.row_indices, vec![0]);
        assert_eq!(change.items[0].key, json!(9));
    }
}
