//! Error types for the p2r-relay library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`RelayError`] — **Fatal**: the request cannot be processed at all
//!   (malformed payload, no targets, credentials cannot be staged). Returned
//!   as `Err(RelayError)` from the top-level `handle*` functions.
//!
//! * [`SupervisorError`] — a single supervised invocation did not complete
//!   normally: the tool could not be launched, ran past its deadline, or
//!   (via [`crate::supervisor::InvocationResult::into_result`]) exited
//!   nonzero. Deadline and exit failures carry whatever output was captured.
//!
//! * [`TargetError`] — **Non-fatal**: the serialisable summary of a
//!   `SupervisorError`, stored inside [`crate::output::TargetOutcome`] so a
//!   request with several targets reports each one instead of aborting on the
//!   first failure.

use std::path::PathBuf;
use thiserror::Error;

use crate::supervisor::{ChannelReadError, StreamBuffer};

/// All fatal errors returned by the request handler.
#[derive(Debug, Error)]
pub enum RelayError {
    // ── Payload errors ────────────────────────────────────────────────────
    /// The event or its `body` is not a JSON object of the expected shape.
    #[error("Invalid request payload: {0}")]
    InvalidPayload(String),

    /// Neither `input` nor `inputs` named anything to convert.
    #[error("Request names no targets\nProvide `input` or `inputs` in the payload.")]
    NoTargets,

    // ── Credential errors ─────────────────────────────────────────────────
    /// Only one of the two rmapi tokens was provided.
    #[error("rmapi credentials incomplete: {missing} is not set")]
    CredentialsMissing { missing: &'static str },

    /// The rmapi config file could not be written.
    #[error("Failed to write rmapi credentials to '{path}': {source}")]
    CredentialsWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Working directory errors ──────────────────────────────────────────
    /// A per-target working directory could not be created.
    #[error("Failed to create working directory under '{root}': {source}")]
    WorkDirFailed {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Terminal failure of one supervised invocation.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The program could not be started (not found, not executable, or the
    /// working directory does not exist). No process was spawned.
    #[error("Failed to launch '{program}': {source}")]
    LaunchFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The deadline fired before the child finished. The child has been
    /// killed and reaped; output captured up to that point is kept.
    #[error("'{program}' exceeded its deadline after {elapsed_ms}ms")]
    DeadlineExceeded {
        program: String,
        elapsed_ms: u64,
        stdout: StreamBuffer,
        stderr: StreamBuffer,
        read_errors: Vec<ChannelReadError>,
    },

    /// The tool ran to completion but reported failure.
    #[error("'{program}' exited with code {exit_code}")]
    NonZeroExit {
        program: String,
        exit_code: i32,
        stdout: StreamBuffer,
        stderr: StreamBuffer,
        read_errors: Vec<ChannelReadError>,
    },

    /// Waiting on the child failed at the OS level.
    #[error("Failed to wait for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl SupervisorError {
    /// Captured stdout, if this failure carries any.
    pub fn stdout(&self) -> Option<&StreamBuffer> {
        match self {
            SupervisorError::DeadlineExceeded { stdout, .. }
            | SupervisorError::NonZeroExit { stdout, .. } => Some(stdout),
            _ => None,
        }
    }

    /// Captured stderr, if this failure carries any.
    pub fn stderr(&self) -> Option<&StreamBuffer> {
        match self {
            SupervisorError::DeadlineExceeded { stderr, .. }
            | SupervisorError::NonZeroExit { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    /// Channels that failed mid-run; empty for launch and wait failures.
    pub fn read_errors(&self) -> &[ChannelReadError] {
        match self {
            SupervisorError::DeadlineExceeded { read_errors, .. }
            | SupervisorError::NonZeroExit { read_errors, .. } => read_errors,
            _ => &[],
        }
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, SupervisorError::DeadlineExceeded { .. })
    }
}

/// A non-fatal error for a single target.
///
/// Stored alongside [`crate::output::TargetOutcome`] when a target fails.
/// The remaining targets are still attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetError {
    /// The tool could not be started.
    #[error("launch failed: {detail}")]
    Launch { detail: String },

    /// The request deadline fired while (or before) this target ran.
    #[error("deadline exceeded after {elapsed_ms}ms")]
    Deadline { elapsed_ms: u64 },

    /// The tool exited with a nonzero code.
    #[error("tool exited with code {exit_code}")]
    NonZeroExit { exit_code: i32 },
}

impl From<&SupervisorError> for TargetError {
    fn from(err: &SupervisorError) -> Self {
        match err {
            SupervisorError::LaunchFailure { source, .. } => TargetError::Launch {
                detail: source.to_string(),
            },
            SupervisorError::Wait { source, .. } => TargetError::Launch {
                detail: format!("wait failed: {source}"),
            },
            SupervisorError::DeadlineExceeded { elapsed_ms, .. } => TargetError::Deadline {
                elapsed_ms: *elapsed_ms,
            },
            SupervisorError::NonZeroExit { exit_code, .. } => TargetError::NonZeroExit {
                exit_code: *exit_code,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_targets_display_has_hint() {
        let msg = RelayError::NoTargets.to_string();
        assert!(msg.contains("inputs"), "got: {msg}");
    }

    #[test]
    fn credentials_missing_names_token() {
        let e = RelayError::CredentialsMissing {
            missing: "RMAPI_DEVICE_TOKEN",
        };
        assert!(e.to_string().contains("RMAPI_DEVICE_TOKEN"));
    }

    #[test]
    fn deadline_display() {
        let e = SupervisorError::DeadlineExceeded {
            program: "p2r".into(),
            elapsed_ms: 1500,
            stdout: StreamBuffer::default(),
            stderr: StreamBuffer::default(),
            read_errors: Vec::new(),
        };
        assert!(e.to_string().contains("1500ms"));
        assert!(e.is_deadline_exceeded());
        assert!(e.stdout().is_some());
        assert!(e.read_errors().is_empty());
    }

    #[test]
    fn launch_failure_maps_to_target_error() {
        let e = SupervisorError::LaunchFailure {
            program: "nope".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(e.stdout().is_none());
        assert!(e.read_errors().is_empty());
        assert_eq!(
            TargetError::from(&e),
            TargetError::Launch {
                detail: "not found".into()
            }
        );
    }

    #[test]
    fn target_error_serialises_with_kind_tag() {
        let json = serde_json::to_value(TargetError::NonZeroExit { exit_code: 2 }).unwrap();
        assert_eq!(json["kind"], "non_zero_exit");
        assert_eq!(json["exit_code"], 2);
    }
}
