//! Gridflow: an incremental data-synchronization and reconciliation engine.
//!
//! Gridflow sits between a queryable, possibly remote row store and a
//! consumer that renders a materialized, windowed view of it. It negotiates
//! which query dimensions (filter, sort, group, paging) run on the store
//! versus locally, turns successive loads into minimal change deltas against
//! the previously materialized list, merges asynchronous push mutations with
//! trailing-edge throttling, and keeps overlapping cancellable loads ordered.
//!
//! The main pieces, leaves first:
//!
//! - [`DataStore`] / [`ArrayStore`]: the pull/push boundary over row storage
//! - [`OperationManager`]: in-flight load tracking and cancellation
//! - [`DataSource`]: query negotiation, paging state, load lifecycle
//! - [`find_changes`]: the key-based minimal edit-script diff
//! - [`PushAggregator`]: throttled aggregation of live mutations
//! - [`DataController`]: the orchestrator owning the materialized list
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use gridflow::{
//!     ArrayStore, Column, ControllerConfig, DataController, DataSource, SourceConfig,
//! };
//! use serde_json::json;
//!
//! let store = Arc::new(ArrayStore::new(
//!     vec![
//!         json!({"id": 1, "name": "Alice"}),
//!         json!({"id": 2, "name": "Bob"}),
//!     ],
//!     vec!["id".to_owned()],
//! ));
//! let source = DataSource::new(store, SourceConfig::default());
//! let controller = DataController::new(
//!     source,
//!     vec![Column::field("name")],
//!     ControllerConfig::default(),
//! );
//!
//! controller.changed().connect(|change| {
//!     println!("{} rows materialized", change.items.len());
//! });
//! controller.load();
//!
//! assert_eq!(controller.items().len(), 2);
//! ```

mod controller;
mod diff;
mod error;
mod live;
mod operation;
pub mod query;
mod row;
mod source;
pub mod store;

pub use controller::{
    Column, ControllerConfig, DataController, RefreshOptions, RowIndexCorrector, UserState,
};
pub use diff::{changed_column_indices, find_changes, is_item_equals, ColumnDiffOptions, FoundChange};
pub use error::{DataError, Result};
pub use live::{apply_push_changes, ApplyPushOptions, PushAggregator};
pub use operation::{OperationId, OperationManager, SettleOutcome};
pub use query::{CmpOp, Filter, GroupSpec, LoadOptions, LoadResult, SortSpec};
pub use row::{Change, ChangeKind, OperationTypes, RowChangeKind, RowItem, RowKey, RowKind};
pub use source::{DataSource, RemoteOperations, SourceChange, SourceConfig};
pub use store::{
    ArrayStore, DataStore, LoadCompletion, PushChange, StoreCapabilities,
};
