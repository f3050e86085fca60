//! Core systems for Gridflow.
//!
//! This crate provides the foundational components the reconciliation engine
//! is built on:
//!
//! - **Signal/Slot System**: Type-safe change notification between the engine
//!   and its consumers
//! - **Deadline Scheduler**: One-shot deadlines with host-injected time, used
//!   for push aggregation windows
//!
//! # Signal/Slot Example
//!
//! ```
//! use gridflow_core::Signal;
//!
//! // Create a signal that notifies when a value changes
//! let value_changed = Signal::<i32>::new();
//!
//! // Connect a slot to handle the signal
//! let conn_id = value_changed.connect(|value| {
//!     println!("Value changed to: {}", value);
//! });
//!
//! // Emit the signal
//! value_changed.emit(42);
//!
//! // Disconnect when done
//! value_changed.disconnect(conn_id);
//! ```
//!
//! # Deadline Example
//!
//! ```
//! use gridflow_core::DeadlineQueue;
//! use std::time::{Duration, Instant};
//!
//! let queue = DeadlineQueue::new();
//! let now = Instant::now();
//! let id = queue.start(now + Duration::from_millis(100));
//!
//! assert!(queue.take_expired(now).is_empty());
//! assert_eq!(queue.take_expired(now + Duration::from_millis(100)), vec![id]);
//! ```

mod error;
pub mod logging;
pub mod signal;
mod timer;

pub use error::{CoreError, Result, SignalError, TimerError};
pub use signal::{ConnectionGuard, ConnectionId, Signal, SignalExt};
pub use timer::{DeadlineQueue, TimerId};
