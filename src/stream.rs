//! Streaming handler API: emit each target's outcome as it completes.
//!
//! Unlike the eager [`crate::handler::handle`], which returns only after all
//! targets finish, [`handle_stream`] yields a [`TargetOutcome`] per target.
//! Outcomes arrive in target order (the stream is `buffered`, not
//! `buffer_unordered`), so a caller can log or forward them progressively
//! without re-sorting.
//!
//! The progress callback's `on_request_complete` fires once the last outcome
//! has been yielded.

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::handler::{prepare, run_target};
use crate::output::TargetOutcome;
use crate::payload::RequestPayload;
use crate::supervisor::Deadline;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-target outcomes.
///
/// An `Err` item means a working directory could not be created for that
/// target; tool failures are reported inside `Ok(TargetOutcome)`.
pub type OutcomeStream = Pin<Box<dyn Stream<Item = Result<TargetOutcome, RelayError>> + Send>>;

/// Handle an event, streaming outcomes as targets finish.
///
/// # Returns
/// - `Ok(OutcomeStream)` — one item per target
/// - `Err(RelayError)` — the request itself is unusable (bad payload, no
///   targets, credentials cannot be staged)
pub async fn handle_stream(
    event: &Value,
    deadline: Option<Deadline>,
    config: &RelayConfig,
) -> Result<OutcomeStream, RelayError> {
    let payload = RequestPayload::from_event(event)?;
    let (targets, ctx) = prepare(&payload, deadline, config).await?;
    info!("Streaming {} target(s)", targets.len());

    if let Some(ref cb) = config.progress_callback {
        cb.on_request_start(targets.len());
    }

    let total = targets.len();
    let succeeded = Arc::new(AtomicUsize::new(0));
    let counter = succeeded.clone();

    let outcomes = stream::iter(targets.into_iter().enumerate())
        .map(move |(i, target)| {
            let ctx = ctx.clone();
            async move { run_target(&ctx, i + 1, &target).await }
        })
        .buffered(config.concurrency)
        .inspect(move |item| {
            if matches!(item, Ok(outcome) if outcome.succeeded()) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });

    let callback = config.progress_callback.clone();
    let finish = stream::once(async move {
        let ok = succeeded.load(Ordering::Relaxed);
        info!("Stream complete: {}/{} targets succeeded", ok, total);
        if let Some(cb) = callback {
            cb.on_request_complete(total, ok);
        }
    })
    .filter_map(|()| async { None::<Result<TargetOutcome, RelayError>> });

    Ok(Box::pin(outcomes.chain(finish)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn bad_payload_fails_before_streaming() {
        let config = RelayConfig::default();
        let result = handle_stream(&json!({ "verbose": true }), None, &config).await;
        assert!(matches!(result, Err(RelayError::NoTargets)));
    }
}
