//! Eager (whole-request) handler entry points.
//!
//! [`handle`] parses the event, stages credentials, runs the tool once per
//! target and returns every outcome together. Use
//! [`crate::stream::handle_stream`] instead to receive outcomes as each
//! target finishes.
//!
//! Each target runs in its own fresh temporary working directory under
//! [`RelayConfig::work_root`]. The handler never changes its own current
//! directory, so a warm worker whose previous cwd was deleted keeps working.

use crate::artifact;
use crate::config::RelayConfig;
use crate::credentials::{self, StagedCredentials};
use crate::error::RelayError;
use crate::output::{HandlerOutput, Response, TargetOutcome};
use crate::payload::{RequestPayload, ToolOptions};
use crate::supervisor::{self, Deadline, Invocation};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Handle a raw trigger event.
///
/// # Arguments
/// * `event`    — direct payload or proxy event with a JSON `body`
/// * `deadline` — request deadline; `None` uses
///   [`RelayConfig::default_timeout_secs`] from now
/// * `config`   — handler configuration
///
/// # Returns
/// `Ok(HandlerOutput)` once every target was attempted, even if some failed
/// (check [`HandlerOutput::all_succeeded`]).
///
/// # Errors
/// Returns `Err(RelayError)` only when the request cannot be processed at
/// all: malformed payload, no targets, credentials or working directories
/// that cannot be created.
pub async fn handle(
    event: &Value,
    deadline: Option<Deadline>,
    config: &RelayConfig,
) -> Result<HandlerOutput, RelayError> {
    debug!("Handler triggered with event '{}'", event);
    let payload = RequestPayload::from_event(event)?;
    handle_payload(&payload, deadline, config).await
}

/// Handle an already-parsed payload.
pub async fn handle_payload(
    payload: &RequestPayload,
    deadline: Option<Deadline>,
    config: &RelayConfig,
) -> Result<HandlerOutput, RelayError> {
    let total_start = Instant::now();
    let (targets, ctx) = prepare(payload, deadline, config).await?;
    let total = targets.len();
    info!("Handling {} target(s)", total);

    if let Some(ref cb) = config.progress_callback {
        cb.on_request_start(total);
    }

    let outcomes: Vec<TargetOutcome> = stream::iter(targets.into_iter().enumerate().map(|(i, target)| {
        let ctx = ctx.clone();
        async move { run_target(&ctx, i + 1, &target).await }
    }))
    .buffered(config.concurrency)
    .collect::<Vec<Result<TargetOutcome, RelayError>>>()
    .await
    .into_iter()
    .collect::<Result<_, _>>()?;

    let output = HandlerOutput::new(outcomes, total_start.elapsed().as_millis() as u64);

    info!(
        "Request complete: {}/{} targets succeeded, {}ms total",
        output.stats.succeeded, output.stats.total_targets, output.stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_request_complete(output.stats.total_targets, output.stats.succeeded);
    }

    Ok(output)
}

/// Handle an event and map the result straight to a trigger [`Response`].
///
/// Fatal request errors become a `400` JSON response instead of an `Err`,
/// which is what a proxy integration wants to return to its client.
pub async fn handle_response(
    event: &Value,
    deadline: Option<Deadline>,
    config: &RelayConfig,
) -> Result<Response, RelayError> {
    match handle(event, deadline, config).await {
        Ok(output) => output.to_response(),
        Err(e @ (RelayError::InvalidPayload(_) | RelayError::NoTargets)) => {
            warn!("Rejecting request: {}", e);
            let body = serde_json::json!({ "error": e.to_string() }).to_string();
            Ok(Response::json(400, body))
        }
        Err(e) => Err(e),
    }
}

/// Synchronous wrapper around [`handle`].
///
/// Creates a temporary tokio runtime internally.
pub fn handle_sync(
    event: &Value,
    deadline: Option<Deadline>,
    config: &RelayConfig,
) -> Result<HandlerOutput, RelayError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| RelayError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(handle(event, deadline, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Everything a single target run needs, cheap to clone per target.
#[derive(Clone)]
pub(crate) struct TargetContext {
    pub(crate) options: ToolOptions,
    pub(crate) config: RelayConfig,
    pub(crate) deadline: Deadline,
    pub(crate) total: usize,
    /// Kept alive until the last target holding it finishes.
    pub(crate) credentials: Option<Arc<StagedCredentials>>,
}

/// Validate the payload, fix the deadline and stage credentials.
pub(crate) async fn prepare(
    payload: &RequestPayload,
    deadline: Option<Deadline>,
    config: &RelayConfig,
) -> Result<(Vec<String>, TargetContext), RelayError> {
    let targets = payload.targets()?;
    let deadline = deadline.unwrap_or_else(|| Deadline::after(config.default_timeout()));

    let credentials = match config.credentials {
        Some(ref creds) => Some(Arc::new(credentials::stage(creds, &config.work_root).await?)),
        None => {
            debug!("No rmapi credentials configured; tool uses its own config");
            None
        }
    };

    let ctx = TargetContext {
        options: payload.options.clone(),
        config: config.clone(),
        deadline,
        total: targets.len(),
        credentials,
    };
    Ok((targets, ctx))
}

/// Run the tool for one target in a fresh working directory.
///
/// Only working-directory creation is fatal; every tool failure is folded
/// into the returned outcome.
pub(crate) async fn run_target(
    ctx: &TargetContext,
    idx: usize,
    target: &str,
) -> Result<TargetOutcome, RelayError> {
    let config = &ctx.config;
    let work_dir = tempfile::Builder::new()
        .prefix("p2r-work-")
        .tempdir_in(&config.work_root)
        .map_err(|source| RelayError::WorkDirFailed {
            root: config.work_root.clone(),
            source,
        })?;

    let mut invocation = Invocation::new(&config.program, work_dir.path(), ctx.deadline)
        .args(ctx.options.argv_for(target));
    if let Some(ref staged) = ctx.credentials {
        let (key, path) = staged.env_pair();
        invocation = invocation.env(key, path);
    }

    info!("Running {} for target '{}' ({}/{})", config.program, target, idx, ctx.total);
    if let Some(ref cb) = config.progress_callback {
        cb.on_target_start(idx, ctx.total, target);
    }

    let start = Instant::now();
    let run = supervisor::run(&invocation).await;
    let duration_ms = start.elapsed().as_millis() as u64;
    let mut outcome = TargetOutcome::from_run(idx, target, run, duration_ms);

    if outcome.succeeded() && config.collect_artifacts {
        outcome.artifact = artifact::collect(work_dir.path()).await;
    }

    match outcome.error {
        None => {
            if let Some(ref cb) = config.progress_callback {
                cb.on_target_complete(idx, ctx.total, target, outcome.exit_code.unwrap_or(0));
            }
        }
        Some(ref e) => {
            warn!("Target '{}' failed: {}", target, e);
            if let Some(ref cb) = config.progress_callback {
                cb.on_target_error(idx, ctx.total, target, &e.to_string());
            }
        }
    }

    // `work_dir` is removed here; the artifact bytes are already in memory.
    Ok(outcome)
}
