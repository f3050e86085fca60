//! Logging facilities for Gridflow.
//!
//! Gridflow uses the `tracing` crate for instrumentation. To see logs, install
//! a tracing subscriber in the host application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt::init();
//!     // Application code...
//! }
//! ```

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "gridflow_core";
    /// Signal/slot system target.
    pub const SIGNAL: &str = "gridflow_core::signal";
    /// Deadline scheduling target.
    pub const TIMER: &str = "gridflow_core::timer";
    /// Data source adapter target.
    pub const SOURCE: &str = "gridflow::source";
    /// Change/diff engine target.
    pub const DIFF: &str = "gridflow::diff";
    /// Push aggregation target.
    pub const LIVE: &str = "gridflow::live";
    /// Reconciliation controller target.
    pub const CONTROLLER: &str = "gridflow::controller";
}
