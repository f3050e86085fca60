//! Push aggregation: trailing-edge throttling of live mutations.
//!
//! Stores apply pushed mutations to their own rows immediately, but the
//! visible reconciliation pass is throttled: the first push of a quiet period
//! arms a deadline one window ahead, later pushes merge into the pending
//! batch without extending it, and the whole batch flushes when the deadline
//! fires. Time is injected by the host, so nothing here sleeps or spawns.

use std::time::{Duration, Instant};

use gridflow_core::logging::targets;
use gridflow_core::{DeadlineQueue, TimerId};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use crate::store::{key_of, merge_payload, PushChange};

#[derive(Debug, Default)]
struct AggregatorInner {
    pending: Vec<PushChange>,
    armed: Option<TimerId>,
    last_flush: Option<Instant>,
}

/// Collects push batches and decides when they become visible.
///
/// With a zero window every batch flushes synchronously from
/// [`accept`](Self::accept).
pub struct PushAggregator {
    window: Duration,
    timers: DeadlineQueue,
    inner: Mutex<AggregatorInner>,
}

impl PushAggregator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            timers: DeadlineQueue::new(),
            inner: Mutex::new(AggregatorInner::default()),
        }
    }

    /// Take in one push batch at time `now`.
    ///
    /// Returns `Some(batch)` when the batch must flush immediately (zero
    /// window); otherwise the changes join the pending batch and flush when
    /// the armed deadline fires.
    pub fn accept(&self, changes: Vec<PushChange>, now: Instant) -> Option<Vec<PushChange>> {
        if self.window.is_zero() {
            return Some(changes);
        }

        let mut inner = self.inner.lock();
        inner.pending.extend(changes);
        if inner.armed.is_none() {
            // Back-to-back batches pace at one flush per window; after a
            // quiet period the full window starts from now.
            let deadline = match inner.last_flush {
                Some(last) if last + self.window > now => last + self.window,
                _ => now + self.window,
            };
            inner.armed = Some(self.timers.start(deadline));
            trace!(
                target: targets::LIVE,
                pending = inner.pending.len(),
                "armed push flush deadline"
            );
        }
        None
    }

    /// The next flush deadline, when one is armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Flush the pending batch if its deadline has passed at `now`.
    pub fn flush_due(&self, now: Instant) -> Option<Vec<PushChange>> {
        let expired = self.timers.take_expired(now);
        let mut inner = self.inner.lock();
        match inner.armed {
            Some(id) if expired.contains(&id) => {
                inner.armed = None;
                inner.last_flush = Some(now);
                let batch = std::mem::take(&mut inner.pending);
                trace!(target: targets::LIVE, changes = batch.len(), "flushing push batch");
                (!batch.is_empty()).then_some(batch)
            }
            _ => None,
        }
    }

    /// Number of changes waiting for a flush.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Drop the pending batch and disarm the deadline.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.armed.take() {
            let _ = self.timers.cancel(id);
        }
        inner.pending.clear();
    }
}

/// How [`apply_push_changes`] maps keys and bounds the visible window.
#[derive(Debug, Clone, Copy)]
pub struct ApplyPushOptions<'a> {
    /// The store's key fields, for locating rows by key.
    pub key_fields: &'a [String],
    /// The items are grouped `{key, items}` nodes rather than flat rows.
    pub grouped: bool,
    /// Visible page capacity. Inserts are dropped once the window is full;
    /// the next full load brings them in at their proper position.
    pub page_take: Option<usize>,
}

/// Patch a materialized item list in place with a flushed push batch.
///
/// Grouped lists only take updates: inserts and removes would need the group
/// path recomputed, which only a reload can do. Rows named by a key that is
/// not in the window are skipped.
pub fn apply_push_changes(
    items: &mut Vec<Value>,
    changes: &[PushChange],
    options: &ApplyPushOptions<'_>,
) {
    for change in changes {
        if options.grouped {
            if let PushChange::Update { key, data } = change {
                update_in_groups(items, key, data, options.key_fields);
            }
            continue;
        }
        match change {
            PushChange::Insert { data } => {
                let full = options
                    .page_take
                    .is_some_and(|take| items.len() >= take);
                if !full {
                    items.push(data.clone());
                }
            }
            PushChange::Update { key, data } => {
                if let Some(i) = position_by_key(items, key, options.key_fields) {
                    merge_payload(&mut items[i], data);
                }
            }
            PushChange::Remove { key } => {
                if let Some(i) = position_by_key(items, key, options.key_fields) {
                    items.remove(i);
                }
            }
        }
    }
}

fn position_by_key(items: &[Value], key: &Value, key_fields: &[String]) -> Option<usize> {
    items.iter().position(|row| key_of(key_fields, row) == *key)
}

fn update_in_groups(items: &mut [Value], key: &Value, data: &Value, key_fields: &[String]) -> bool {
    for item in items {
        if let Some(children) = item.get_mut("items").and_then(Value::as_array_mut) {
            if update_in_groups(children, key, data, key_fields) {
                return true;
            }
        } else if key_of(key_fields, item) == *key {
            merge_payload(item, data);
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(key: i64, data: Value) -> PushChange {
        PushChange::Update {
            key: json!(key),
            data,
        }
    }

    #[test]
    fn test_zero_window_flushes_synchronously() {
        let agg = PushAggregator::new(Duration::ZERO);
        let batch = agg.accept(vec![update(1, json!({"a": 1}))], Instant::now());
        assert_eq!(batch.map(|b| b.len()), Some(1));
        assert_eq!(agg.pending_count(), 0);
    }

    #[test]
    fn test_batches_merge_without_extending_deadline() {
        let agg = PushAggregator::new(Duration::from_millis(100));
        let t0 = Instant::now();

        assert!(agg.accept(vec![update(1, json!({"a": 1}))], t0).is_none());
        let deadline = agg.next_deadline().unwrap();
        assert_eq!(deadline, t0 + Duration::from_millis(100));

        assert!(agg
            .accept(vec![update(2, json!({"a": 2}))], t0 + Duration::from_millis(30))
            .is_none());
        assert_eq!(agg.next_deadline(), Some(deadline));

        assert!(agg.flush_due(t0 + Duration::from_millis(99)).is_none());
        let batch = agg.flush_due(deadline).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(agg.next_deadline(), None);
    }

    #[test]
    fn test_sustained_pushes_pace_one_flush_per_window() {
        let window = Duration::from_millis(100);
        let agg = PushAggregator::new(window);
        let t0 = Instant::now();

        agg.accept(vec![update(1, json!({}))], t0);
        agg.flush_due(t0 + window).unwrap();

        // A push arriving shortly after a flush waits out the remainder of
        // the window, not a fresh full window.
        agg.accept(vec![update(2, json!({}))], t0 + window + Duration::from_millis(10));
        assert_eq!(agg.next_deadline(), Some(t0 + window + window));
    }

    #[test]
    fn test_quiet_period_restarts_window() {
        let window = Duration::from_millis(100);
        let agg = PushAggregator::new(window);
        let t0 = Instant::now();

        agg.accept(vec![update(1, json!({}))], t0);
        agg.flush_due(t0 + window).unwrap();

        let late = t0 + Duration::from_millis(500);
        agg.accept(vec![update(2, json!({}))], late);
        assert_eq!(agg.next_deadline(), Some(late + window));
    }

    #[test]
    fn test_clear_disarms() {
        let agg = PushAggregator::new(Duration::from_millis(100));
        let t0 = Instant::now();
        agg.accept(vec![update(1, json!({}))], t0);
        agg.clear();
        assert_eq!(agg.pending_count(), 0);
        assert_eq!(agg.next_deadline(), None);
        assert!(agg.flush_due(t0 + Duration::from_millis(200)).is_none());
    }

    #[test]
    fn test_apply_flat_changes() {
        let key_fields = vec!["id".to_owned()];
        let mut items = vec![json!({"id": 1, "v": "a"}), json!({"id": 2, "v": "b"})];
        let options = ApplyPushOptions {
            key_fields: &key_fields,
            grouped: false,
            page_take: None,
        };

        apply_push_changes(
            &mut items,
            &[
                update(1, json!({"v": "a2"})),
                PushChange::Remove { key: json!(2) },
                PushChange::Insert {
                    data: json!({"id": 3, "v": "c"}),
                },
            ],
            &options,
        );

        assert_eq!(
            items,
            vec![json!({"id": 1, "v": "a2"}), json!({"id": 3, "v": "c"})]
        );
    }

    #[test]
    fn test_insert_dropped_when_page_full() {
        let key_fields = vec!["id".to_owned()];
        let mut items = vec![json!({"id": 1}), json!({"id": 2})];
        let options = ApplyPushOptions {
            key_fields: &key_fields,
            grouped: false,
            page_take: Some(2),
        };
        apply_push_changes(
            &mut items,
            &[PushChange::Insert {
                data: json!({"id": 3}),
            }],
            &options,
        );
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_grouped_takes_updates_only() {
        let key_fields = vec!["id".to_owned()];
        let mut items = vec![json!({
            "key": "x",
            "items": [{"id": 1, "v": "a"}, {"id": 2, "v": "b"}]
        })];
        let options = ApplyPushOptions {
            key_fields: &key_fields,
            grouped: true,
            page_take: None,
        };

        apply_push_changes(
            &mut items,
            &[
                update(2, json!({"v": "b2"})),
                PushChange::Remove { key: json!(1) },
                PushChange::Insert { data: json!({"id": 3}) },
            ],
            &options,
        );

        assert_eq!(
            items,
            vec![json!({
                "key": "x",
                "items": [{"id": 1, "v": "a"}, {"id": 2, "v": "b2"}]
            })]
        );
    }

    #[test]
    fn test_unknown_key_skipped() {
        let key_fields = vec!["id".to_owned()];
        let mut items = vec![json!({"id": 1, "v": "a"})];
        let options = ApplyPushOptions {
            key_fields: &key_fields,
            grouped: false,
            page_take: None,
        };
        apply_push_changes(&mut items, &[update(9, json!({"v": "x"}))], &options);
        assert_eq!(items, vec![json!({"id": 1, "v": "a"})]);
    }
}
