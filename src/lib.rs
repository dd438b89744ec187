//! # p2r-relay
//!
//! Run the [paper2remarkable] CLI (`p2r`) on behalf of a serverless trigger
//! and relay what happened.
//!
//! ## Why a supervisor?
//!
//! `p2r` is not a library; the only way to drive it is to run it. Running it
//! inside a short-lived function means three things must hold at once: both
//! of its output pipes are drained (a full stderr pipe would hang it), the
//! run stops before the platform's own timeout, and whatever it printed is
//! kept for diagnosis whether it succeeded, failed, or was cut off.
//! [`supervisor::run`] does exactly that and nothing more.
//!
//! ## Request flow
//!
//! ```text
//! event
//!  │
//!  ├─ 1. Payload      direct object or proxy `body` → targets + flags
//!  ├─ 2. Credentials  rmapi tokens → request-owned rmapi.conf
//!  ├─ 3. Supervise    one `p2r [flags] <target>` per target, fresh cwd each
//!  ├─ 4. Artifacts    PDF left behind by `--no-upload`, if any
//!  └─ 5. Response     200/500 + JSON summary, or base64 PDF body
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use p2r_relay::{handle, Deadline, RelayConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfig::from_env()?;
//!     let event = serde_json::json!({ "input": "https://arxiv.org/abs/1706.03762" });
//!     let deadline = Deadline::from_remaining_millis(900_000, config.safety_margin());
//!     let output = handle(&event, Some(deadline), &config).await?;
//!     println!("{}", output.to_response()?.status_code);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `p2r-relay` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! [paper2remarkable]: https://github.com/GjjvdBurg/paper2remarkable

// ── Modules ──────────────────────────────────────────────────────────────

pub mod artifact;
pub mod config;
pub mod credentials;
pub mod error;
pub mod handler;
pub mod output;
pub mod payload;
pub mod progress;
pub mod stream;
pub mod supervisor;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use artifact::Artifact;
pub use config::{RelayConfig, RelayConfigBuilder, RmapiCredentials};
pub use error::{RelayError, SupervisorError, TargetError};
pub use handler::{handle, handle_payload, handle_response, handle_sync};
pub use output::{HandlerOutput, RelayStats, Response, TargetOutcome};
pub use payload::{RequestPayload, ToolOptions};
pub use progress::{NoopProgressCallback, ProgressCallback, RelayProgressCallback};
pub use stream::{handle_stream, OutcomeStream};
pub use supervisor::{Deadline, Invocation, InvocationResult, StreamBuffer};
