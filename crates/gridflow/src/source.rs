//! The data source adapter: query negotiation, paging state, load lifecycle.
//!
//! [`DataSource`] sits between a [`DataStore`] and the reconciliation
//! controller. It owns the current query (filter, search, sort, group,
//! paging), decides per dimension whether the store executes it or the
//! adapter re-runs it locally, tracks overlapping loads through an
//! [`OperationManager`], throttles pushed mutations through a
//! [`PushAggregator`], and publishes every visible outcome through signals.
//!
//! Load completions may arrive from any thread and in any order. They are
//! funneled through an arrival-ordered queue drained by a single applier, so
//! state commits never interleave; a completion whose operation was canceled
//! settles as a silent discard.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, trace};

use gridflow_core::logging::targets;
use gridflow_core::{ConnectionGuard, Signal, SignalExt};

use crate::error::{DataError, Result};
use crate::live::{apply_push_changes, ApplyPushOptions, PushAggregator};
use crate::operation::{OperationId, OperationManager, SettleOutcome};
use crate::query::{
    field_value, search_filter, sort_rows, Filter, GroupSpec, LoadOptions, LoadResult, SortSpec,
};
use crate::row::OperationTypes;
use crate::store::{DataStore, PushChange, StoreCapabilities};

/// How the adapter decides which query dimensions the store executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOperations {
    /// Use whatever the store declares in its capabilities.
    Auto,
    /// Override the store's declaration.
    Custom(StoreCapabilities),
}

/// Static configuration of a [`DataSource`].
#[derive(Clone)]
pub struct SourceConfig {
    pub remote_operations: RemoteOperations,
    /// Whether the source windows its output into pages.
    pub paginate: bool,
    /// Rows per page. `None` leaves the page length to the store
    /// (variable-size/continuation mode).
    pub page_size: Option<usize>,
    /// Trailing-edge throttle for pushed mutations. Zero flushes every push
    /// synchronously.
    pub push_aggregation_window: Duration,
    /// Reload instead of patching items in place when pushes flush.
    pub reshape_on_push: bool,
    /// Reuse raw store results across purely local query changes.
    pub cache_enabled: bool,
    /// Fields the free-text search matches against.
    pub search_fields: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            remote_operations: RemoteOperations::Auto,
            paginate: true,
            page_size: Some(20),
            push_aggregation_window: Duration::ZERO,
            reshape_on_push: false,
            cache_enabled: true,
            search_fields: Vec::new(),
        }
    }
}

/// Payload of the `changed` signal: one committed visible outcome.
#[derive(Debug, Clone)]
pub struct SourceChange {
    /// Which query dimensions changed in the load behind this event.
    pub operation_types: OperationTypes,
    /// Set when the event is a push flush rather than a load; carries the
    /// flushed batch so consumers can patch incrementally.
    pub push_changes: Option<Vec<PushChange>>,
    /// Repaint preference attached by whoever requested the load.
    pub repaint_changes_only: Option<bool>,
}

#[derive(Debug, Clone)]
struct RawCache {
    rows: Vec<Value>,
    signature: String,
}

#[derive(Default)]
struct SourceState {
    filter: Option<Filter>,
    search_text: String,
    sort: Vec<SortSpec>,
    group: Vec<GroupSpec>,
    page_index: usize,
    page_size: Option<usize>,
    require_total_count: bool,
    total_count: Option<i64>,
    has_known_last_page: bool,
    is_last_page: bool,
    /// `tokens[i]` is the cursor that loads page `i + 1`. Token paging only
    /// supports walking forward.
    tokens: Vec<String>,
    items: Vec<Value>,
    raw_cache: Option<RawCache>,
    is_loaded: bool,
    loading_count: usize,
    last_options: Option<LoadOptions>,
    disposed: bool,
}

struct QueuedResult {
    op: OperationId,
    options: LoadOptions,
    op_types: OperationTypes,
    result: Result<LoadResult>,
    from_cache: bool,
}

type LoadOptionsHook = Arc<dyn Fn(&mut LoadOptions) + Send + Sync>;
type LoadResultHook = Arc<dyn Fn(&mut LoadResult) + Send + Sync>;

/// A windowed, observable view over a [`DataStore`].
///
/// Construct with [`DataSource::new`]; the adapter subscribes to the store's
/// push signal for its whole lifetime and releases it on
/// [`dispose`](Self::dispose) or drop.
pub struct DataSource {
    store: Arc<dyn DataStore>,
    config: SourceConfig,
    remote: StoreCapabilities,
    state: Mutex<SourceState>,
    operations: OperationManager,
    aggregator: PushAggregator,
    changed: Arc<Signal<SourceChange>>,
    loading_changed: Arc<Signal<bool>>,
    load_error: Arc<Signal<DataError>>,
    push_guard: Mutex<Option<ConnectionGuard<Vec<PushChange>>>>,
    customize_load_options: Mutex<Option<LoadOptionsHook>>,
    customize_load_result: Mutex<Option<LoadResultHook>>,
    result_queue: Mutex<VecDeque<QueuedResult>>,
    applying: AtomicBool,
}

impl DataSource {
    pub fn new(store: Arc<dyn DataStore>, config: SourceConfig) -> Arc<Self> {
        let remote = match config.remote_operations {
            RemoteOperations::Auto => store.capabilities(),
            RemoteOperations::Custom(caps) => caps,
        };
        let window = config.push_aggregation_window;
        let page_size = config.page_size;

        let source = Arc::new(Self {
            store,
            config,
            remote,
            state: Mutex::new(SourceState {
                page_size,
                ..SourceState::default()
            }),
            operations: OperationManager::new(),
            aggregator: PushAggregator::new(window),
            changed: Arc::new(Signal::new()),
            loading_changed: Arc::new(Signal::new()),
            load_error: Arc::new(Signal::new()),
            push_guard: Mutex::new(None),
            customize_load_options: Mutex::new(None),
            customize_load_result: Mutex::new(None),
            result_queue: Mutex::new(VecDeque::new()),
            applying: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&source);
        let guard = source
            .store
            .pushed()
            .connect_guarded(move |changes: &Vec<PushChange>| {
                if let Some(source) = weak.upgrade() {
                    source.handle_pushed(changes.clone());
                }
            });
        *source.push_guard.lock() = Some(guard);

        source
    }

    // ---- signals ----

    /// Emitted after every committed load and every push flush.
    pub fn changed(&self) -> &Arc<Signal<SourceChange>> {
        &self.changed
    }

    /// Emitted when the source enters or leaves the loading state.
    pub fn loading_changed(&self) -> &Arc<Signal<bool>> {
        &self.loading_changed
    }

    /// Emitted when a live load fails. State is left untouched.
    pub fn load_error(&self) -> &Arc<Signal<DataError>> {
        &self.load_error
    }

    // ---- hooks ----

    /// Install a hook that may adjust every outgoing [`LoadOptions`].
    pub fn set_customize_load_options<F>(&self, hook: F)
    where
        F: Fn(&mut LoadOptions) + Send + Sync + 'static,
    {
        *self.customize_load_options.lock() = Some(Arc::new(hook));
    }

    /// Install a hook that may adjust every processed [`LoadResult`] before
    /// it commits.
    pub fn set_customize_load_result<F>(&self, hook: F)
    where
        F: Fn(&mut LoadResult) + Send + Sync + 'static,
    {
        *self.customize_load_result.lock() = Some(Arc::new(hook));
    }

    // ---- accessors ----

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    /// The materialized items of the current window. Grouped queries yield
    /// nested `{key, items}` nodes.
    pub fn items(&self) -> Vec<Value> {
        self.state.lock().items.clone()
    }

    pub fn filter(&self) -> Option<Filter> {
        self.state.lock().filter.clone()
    }

    pub fn search_text(&self) -> String {
        self.state.lock().search_text.clone()
    }

    pub fn sort(&self) -> Vec<SortSpec> {
        self.state.lock().sort.clone()
    }

    pub fn group(&self) -> Vec<GroupSpec> {
        self.state.lock().group.clone()
    }

    pub fn page_index(&self) -> usize {
        self.state.lock().page_index
    }

    /// Rows per page; `None` in variable-size/continuation mode.
    pub fn page_size(&self) -> Option<usize> {
        self.state.lock().page_size
    }

    /// Total rows matching the current filter, when counting was requested
    /// and the count is known.
    pub fn total_count(&self) -> Option<i64> {
        self.state.lock().total_count
    }

    /// Number of pages, when the total and the page length are both known.
    pub fn page_count(&self) -> Option<usize> {
        let state = self.state.lock();
        match (state.total_count, state.page_size) {
            (Some(total), Some(size)) => {
                let size = size.max(1) as i64;
                Some(((total + size - 1) / size).max(0) as usize)
            }
            _ => None,
        }
    }

    /// Whether the current page is known to be the last one.
    pub fn is_last_page(&self) -> bool {
        let state = self.state.lock();
        state.has_known_last_page && state.is_last_page
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().is_loaded
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading_count > 0
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Look up a row in the underlying store.
    pub fn by_key(&self, key: &Value) -> Result<Value> {
        if self.is_disposed() {
            return Err(DataError::Disposed);
        }
        self.store.by_key(key)
    }

    // ---- query setters ----

    /// Jump to another page. A no-op when the index is unchanged.
    pub fn set_page_index(self: &Arc<Self>, index: usize) {
        let changed = {
            let mut state = self.state.lock();
            if state.disposed || state.page_index == index {
                false
            } else {
                state.page_index = index;
                true
            }
        };
        if changed {
            self.load_internal(false, None);
        }
    }

    /// Change the page size. Resets the page index to zero.
    pub fn set_page_size(self: &Arc<Self>, size: usize) {
        let changed = {
            let mut state = self.state.lock();
            if state.disposed || state.page_size == Some(size) {
                false
            } else {
                state.page_size = Some(size);
                state.page_index = 0;
                state.tokens.clear();
                true
            }
        };
        if changed {
            self.load_internal(false, None);
        }
    }

    /// Replace the filter. Resets paging, since the old window position is
    /// meaningless against a different row set.
    pub fn set_filter(self: &Arc<Self>, filter: Option<Filter>) {
        let changed = {
            let mut state = self.state.lock();
            if state.disposed || state.filter == filter {
                false
            } else {
                state.filter = filter;
                Self::reset_window(&mut state);
                true
            }
        };
        if changed {
            self.load_internal(false, None);
        }
    }

    /// Replace the free-text search. Resets paging like a filter change.
    pub fn set_search_text(self: &Arc<Self>, text: impl Into<String>) {
        let text = text.into();
        let changed = {
            let mut state = self.state.lock();
            if state.disposed || state.search_text == text {
                false
            } else {
                state.search_text = text;
                Self::reset_window(&mut state);
                true
            }
        };
        if changed {
            self.load_internal(false, None);
        }
    }

    /// Replace the sort order. Keeps the current page.
    pub fn set_sort(self: &Arc<Self>, sort: Vec<SortSpec>) {
        let changed = {
            let mut state = self.state.lock();
            if state.disposed || state.sort == sort {
                false
            } else {
                state.sort = sort;
                true
            }
        };
        if changed {
            self.load_internal(false, None);
        }
    }

    /// Replace the grouping. Keeps the current page.
    pub fn set_group(self: &Arc<Self>, group: Vec<GroupSpec>) {
        let changed = {
            let mut state = self.state.lock();
            if state.disposed || state.group == group {
                false
            } else {
                state.group = group;
                true
            }
        };
        if changed {
            self.load_internal(false, None);
        }
    }

    /// Whether subsequent loads ask for the total matching row count.
    pub fn set_require_total_count(&self, require: bool) {
        self.state.lock().require_total_count = require;
    }

    fn reset_window(state: &mut SourceState) {
        state.page_index = 0;
        state.total_count = None;
        state.has_known_last_page = false;
        state.tokens.clear();
    }

    // ---- loading ----

    /// Load the current window. Overlapping loads all stay in flight; their
    /// results apply in arrival order.
    ///
    /// Returns the operation id, usable with [`cancel`](Self::cancel), or
    /// `None` after disposal.
    pub fn load(self: &Arc<Self>) -> Option<OperationId> {
        self.load_internal(false, None)
    }

    /// Discard caches and totals, then load the current window from scratch.
    pub fn reload(self: &Arc<Self>) -> Option<OperationId> {
        self.reload_with_repaint(None)
    }

    /// Reload with a repaint preference carried to the resulting `changed`
    /// event.
    pub fn reload_with_repaint(
        self: &Arc<Self>,
        repaint_changes_only: Option<bool>,
    ) -> Option<OperationId> {
        {
            let mut state = self.state.lock();
            if state.disposed {
                return None;
            }
            state.raw_cache = None;
            state.total_count = None;
            state.has_known_last_page = false;
            state.tokens.clear();
        }
        self.load_internal(true, repaint_changes_only)
    }

    /// Cancel one in-flight load. Its eventual result is discarded on
    /// arrival; the loading state settles now instead of waiting for the
    /// abandoned completion. Returns `false` once the operation has settled.
    pub fn cancel(&self, op: OperationId) -> bool {
        // Mark before canceling: if the result settles in between, the mark
        // is gone with the operation and the live apply ignores it.
        self.operations.set_context(op, "loading_settled", json!(true));
        if !self.operations.cancel(op) {
            return false;
        }
        debug!(target: targets::SOURCE, op = ?op, "load canceled");
        self.finish_loading();
        true
    }

    /// Cancel every in-flight load. Idempotent.
    pub fn cancel_all(&self) {
        for op in self.operations.live_ids() {
            self.cancel(op);
        }
    }

    fn load_internal(
        self: &Arc<Self>,
        reload: bool,
        repaint_changes_only: Option<bool>,
    ) -> Option<OperationId> {
        let (mut options, last_options) = {
            let state = self.state.lock();
            if state.disposed {
                return None;
            }
            (self.build_options(&state), state.last_options.clone())
        };

        let hook = self.customize_load_options.lock().clone();
        if let Some(hook) = hook {
            hook(&mut options);
        }

        let op_types = if reload {
            OperationTypes::full_reload()
        } else {
            Self::operation_types(last_options.as_ref(), &options)
        };

        let op = self.operations.create();
        if let Some(repaint) = repaint_changes_only {
            self.operations
                .set_context(op, "repaint_changes_only", json!(repaint));
        }

        let (became_loading, cached_rows) = {
            let mut state = self.state.lock();
            state.loading_count += 1;
            let cached = match &state.raw_cache {
                Some(cache)
                    if self.cache_eligible()
                        && cache.signature == self.cache_signature(&options) =>
                {
                    Some(cache.rows.clone())
                }
                _ => None,
            };
            (state.loading_count == 1, cached)
        };
        if became_loading {
            self.loading_changed.emit(true);
        }

        debug!(
            target: targets::SOURCE,
            op = ?op,
            reload,
            cached = cached_rows.is_some(),
            "starting load"
        );

        match cached_rows {
            Some(rows) => {
                self.enqueue_result(QueuedResult {
                    op,
                    options,
                    op_types,
                    result: Ok(LoadResult {
                        rows,
                        total_count: None,
                        next_token: None,
                    }),
                    from_cache: true,
                });
            }
            None => {
                let weak = Arc::downgrade(self);
                let completion_options = options.clone();
                self.store.load(
                    &options,
                    Box::new(move |result| {
                        if let Some(source) = weak.upgrade() {
                            source.enqueue_result(QueuedResult {
                                op,
                                options: completion_options,
                                op_types,
                                result,
                                from_cache: false,
                            });
                        }
                    }),
                );
            }
        }
        Some(op)
    }

    fn build_options(&self, state: &SourceState) -> LoadOptions {
        let search = search_filter(&self.config.search_fields, &state.search_text);
        let filter = match (state.filter.clone(), search) {
            (Some(f), Some(s)) => Some(Filter::And(vec![f, s])),
            (Some(f), None) => Some(f),
            (None, Some(s)) => Some(s),
            (None, None) => None,
        };

        let continuation = (state.page_index > 0)
            .then(|| state.tokens.get(state.page_index - 1).cloned())
            .flatten();

        // Without a fixed page length the store decides where pages end;
        // skip/take would be meaningless.
        let (skip, take) = match state.page_size {
            Some(size) if self.config.paginate => {
                (Some(state.page_index * size), Some(size))
            }
            _ => (None, None),
        };

        LoadOptions {
            filter,
            sort: state.sort.clone(),
            group: state.group.clone(),
            skip,
            take,
            require_total_count: state.require_total_count,
            continuation,
        }
    }

    fn operation_types(prev: Option<&LoadOptions>, next: &LoadOptions) -> OperationTypes {
        match prev {
            None => OperationTypes::full_reload(),
            Some(prev) => OperationTypes {
                reload: false,
                filtering: prev.filter != next.filter,
                sorting: prev.sort != next.sort,
                grouping: prev.group != next.group,
                paging: prev.skip != next.skip || prev.continuation != next.continuation,
                page_size: prev.take != next.take,
            },
        }
    }

    fn cache_eligible(&self) -> bool {
        // With remote paging the raw result is a single page tied to its
        // window, so there is nothing reusable to cache.
        self.config.cache_enabled && !self.remote.paging
    }

    fn cache_signature(&self, options: &LoadOptions) -> String {
        let mut signature = String::new();
        if self.remote.filtering {
            signature.push_str(&format!("f:{:?};", options.filter));
        }
        if self.remote.sorting {
            signature.push_str(&format!("s:{:?};", options.sort));
        }
        if self.remote.grouping {
            signature.push_str(&format!("g:{:?};", options.group));
        }
        signature
    }

    // ---- result application ----

    fn enqueue_result(self: &Arc<Self>, entry: QueuedResult) {
        self.result_queue.lock().push_back(entry);
        // Single applier: whoever wins the flag drains the queue in arrival
        // order, including entries that land while draining.
        loop {
            if self.applying.swap(true, Ordering::AcqRel) {
                return;
            }
            while let Some(entry) = {
                let mut queue = self.result_queue.lock();
                queue.pop_front()
            } {
                self.apply_result(entry);
            }
            self.applying.store(false, Ordering::Release);
            if self.result_queue.lock().is_empty() {
                return;
            }
        }
    }

    fn apply_result(&self, entry: QueuedResult) {
        let repaint_changes_only = self
            .operations
            .context(entry.op, "repaint_changes_only")
            .and_then(|v| v.as_bool());
        // An explicit cancel already settled the loading counter.
        let loading_settled = self
            .operations
            .context(entry.op, "loading_settled")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if self.operations.settle(entry.op) == SettleOutcome::Discard {
            trace!(target: targets::SOURCE, op = ?entry.op, "discarding canceled result");
            if !loading_settled {
                self.finish_loading();
            }
            return;
        }

        let mut result = match entry.result {
            Ok(result) => result,
            Err(err) => {
                debug!(target: targets::SOURCE, op = ?entry.op, error = %err, "load failed");
                self.finish_loading();
                self.load_error.emit(err);
                return;
            }
        };

        let raw_for_cache = (self.cache_eligible() && !entry.from_cache)
            .then(|| RawCache {
                rows: result.rows.clone(),
                signature: self.cache_signature(&entry.options),
            });

        self.run_local_pipeline(&mut result, &entry.options);

        let hook = self.customize_load_result.lock().clone();
        if let Some(hook) = hook {
            hook(&mut result);
        }

        let at_zero = {
            let mut state = self.state.lock();
            if state.disposed {
                state.loading_count = state.loading_count.saturating_sub(1);
                return;
            }

            self.commit_result(&mut state, result, &entry.options);
            if let Some(cache) = raw_for_cache {
                state.raw_cache = Some(cache);
            }
            state.last_options = Some(entry.options);
            state.is_loaded = true;
            state.loading_count = state.loading_count.saturating_sub(1);
            state.loading_count == 0
        };

        if at_zero {
            self.loading_changed.emit(false);
        }
        self.changed.emit(SourceChange {
            operation_types: entry.op_types,
            push_changes: None,
            repaint_changes_only,
        });
    }

    fn finish_loading(&self) {
        let at_zero = {
            let mut state = self.state.lock();
            state.loading_count = state.loading_count.saturating_sub(1);
            state.loading_count == 0
        };
        if at_zero {
            self.loading_changed.emit(false);
        }
    }

    /// Re-run every query dimension the store did not execute.
    fn run_local_pipeline(&self, result: &mut LoadResult, options: &LoadOptions) {
        let mut rows = std::mem::take(&mut result.rows);

        if !self.remote.filtering {
            if let Some(filter) = &options.filter {
                rows.retain(|row| filter.matches(row));
            }
        }

        if options.require_total_count && !self.remote.paging {
            result.total_count = Some(rows.len() as i64);
        } else if !options.require_total_count {
            result.total_count = None;
        }

        let local_grouping = !options.group.is_empty() && !self.remote.grouping;
        let mut effective_sort: Vec<SortSpec> = Vec::new();
        if local_grouping {
            effective_sort.extend(options.group.iter().map(|g| SortSpec {
                selector: g.selector.clone(),
                desc: g.desc,
            }));
        }
        if !self.remote.sorting {
            effective_sort.extend(options.sort.iter().cloned());
        }
        sort_rows(&mut rows, &effective_sort);

        if local_grouping {
            rows = group_rows(rows, &options.group);
        }

        if self.config.paginate && !self.remote.paging {
            let skip = options.skip.unwrap_or(0);
            let take = options.take.unwrap_or(usize::MAX);
            rows = rows.into_iter().skip(skip).take(take).collect();
        }

        result.rows = rows;
    }

    fn commit_result(&self, state: &mut SourceState, result: LoadResult, options: &LoadOptions) {
        state.total_count = result.total_count;

        let page_len = result.rows.len();
        if !self.config.paginate {
            state.is_last_page = true;
            state.has_known_last_page = true;
        } else if options.continuation.is_some() || result.next_token.is_some() {
            state.is_last_page = result.next_token.is_none();
            state.has_known_last_page = true;
            if let Some(token) = result.next_token {
                state.tokens.truncate(state.page_index);
                state.tokens.push(token);
            }
        } else if let Some(total) = result.total_count {
            let seen = options.skip.unwrap_or(0) + page_len;
            state.is_last_page = seen as i64 >= total;
            state.has_known_last_page = true;
        } else {
            // A short page proves the end; a full one proves nothing.
            let short = options.take.is_some_and(|take| page_len < take);
            state.is_last_page = short;
            state.has_known_last_page = short;
        }

        state.items = result.rows;
    }

    // ---- pushes ----

    fn handle_pushed(self: &Arc<Self>, changes: Vec<PushChange>) {
        {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            // Raw cache no longer matches the store's rows.
            state.raw_cache = None;
        }
        if let Some(batch) = self.aggregator.accept(changes, Instant::now()) {
            self.flush_batch(batch);
        }
    }

    /// The instant at which a pending push batch is due, if any.
    pub fn next_push_deadline(&self) -> Option<Instant> {
        self.aggregator.next_deadline()
    }

    /// Flush the pending push batch if it is due at `now`. Returns whether a
    /// flush happened. The host calls this when the deadline it slept on
    /// fires.
    pub fn flush_pushes(self: &Arc<Self>, now: Instant) -> bool {
        match self.aggregator.flush_due(now) {
            Some(batch) => {
                self.flush_batch(batch);
                true
            }
            None => false,
        }
    }

    fn flush_batch(self: &Arc<Self>, batch: Vec<PushChange>) {
        if self.config.reshape_on_push {
            trace!(target: targets::LIVE, changes = batch.len(), "reshaping after push flush");
            self.reload();
            return;
        }

        {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            let key_fields = self.store.key_fields().to_vec();
            let options = ApplyPushOptions {
                key_fields: &key_fields,
                grouped: !state.group.is_empty(),
                page_take: state.page_size.filter(|_| self.config.paginate),
            };
            let mut items = std::mem::take(&mut state.items);
            apply_push_changes(&mut items, &batch, &options);
            state.items = items;
        }

        self.changed.emit(SourceChange {
            operation_types: OperationTypes::default(),
            push_changes: Some(batch),
            repaint_changes_only: None,
        });
    }

    // ---- teardown ----

    /// Tear the source down: cancel in-flight loads, drop the push
    /// subscription, disconnect every slot. Further calls are no-ops.
    pub fn dispose(&self) {
        {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.items.clear();
            state.raw_cache = None;
        }
        self.operations.cancel_all();
        self.operations.clear();
        self.aggregator.clear();
        *self.push_guard.lock() = None;
        self.changed.disconnect_all();
        self.loading_changed.disconnect_all();
        self.load_error.disconnect_all();
        debug!(target: targets::SOURCE, "data source disposed");
    }
}

/// Nest sorted rows into `{key, items}` nodes, one level per grouping dimension.
///
/// Rows must already be ordered by the group selectors; buckets keep
/// encounter order.
fn group_rows(rows: Vec<Value>, specs: &[GroupSpec]) -> Vec<Value> {
    let Some((spec, rest)) = specs.split_first() else {
        return rows;
    };

    let mut keys: Vec<Value> = Vec::new();
    let mut buckets: std::collections::HashMap<String, Vec<Value>> =
        std::collections::HashMap::new();
    for row in rows {
        let key = field_value(&row, &spec.selector);
        let tag = key.to_string();
        if !buckets.contains_key(&tag) {
            keys.push(key);
        }
        buckets.entry(tag).or_default().push(row);
    }

    keys.into_iter()
        .map(|key| {
            let bucket = buckets.remove(&key.to_string()).unwrap_or_default();
            json!({ "key": key, "items": group_rows(bucket, rest) })
        })
        .collect()
}
