//! Progress-callback trait for per-target events.
//!
//! Inject an [`Arc<dyn RelayProgressCallback>`] via
//! [`crate::config::RelayConfigBuilder::progress_callback`] to be told when
//! each target starts and finishes. The CLI uses it to drive a progress bar;
//! a hosted handler can forward the events to its own telemetry.
//!
//! # Example
//!
//! ```rust
//! use p2r_relay::{RelayConfig, RelayProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     failed: AtomicUsize,
//! }
//!
//! impl RelayProgressCallback for CountingCallback {
//!     fn on_target_error(&self, _idx: usize, _total: usize, target: &str, error: &str) {
//!         self.failed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{target} failed: {error}");
//!     }
//! }
//!
//! let config = RelayConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { failed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the handler as it works through the request's targets.
///
/// All methods default to no-ops. With `concurrency > 1` the per-target
/// methods may be called from several tasks at once, so implementations must
/// synchronise any shared state.
pub trait RelayProgressCallback: Send + Sync {
    /// Called once, after the payload is parsed.
    fn on_request_start(&self, total_targets: usize) {
        let _ = total_targets;
    }

    /// Called just before the tool is launched for a target.
    ///
    /// # Arguments
    /// * `idx`    — 1-indexed target position
    /// * `total`  — number of targets in the request
    /// * `target` — URL or path as given in the payload
    fn on_target_start(&self, idx: usize, total: usize, target: &str) {
        let _ = (idx, total, target);
    }

    /// Called when the tool exits 0 for a target.
    fn on_target_complete(&self, idx: usize, total: usize, target: &str, exit_code: i32) {
        let _ = (idx, total, target, exit_code);
    }

    /// Called when a target fails (launch failure, deadline, nonzero exit).
    fn on_target_error(&self, idx: usize, total: usize, target: &str, error: &str) {
        let _ = (idx, total, target, error);
    }

    /// Called once after every target has been attempted.
    fn on_request_complete(&self, total_targets: usize, success_count: usize) {
        let _ = (total_targets, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RelayProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RelayConfig`].
pub type ProgressCallback = Arc<dyn RelayProgressCallback>;
