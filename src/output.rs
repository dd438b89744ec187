//! Handler output types and the response mapping.
//!
//! [`HandlerOutput`] is what the library hands back: one [`TargetOutcome`]
//! per target plus aggregate [`RelayStats`]. [`HandlerOutput::to_response`]
//! turns it into the proxy-style [`Response`] a serverless trigger expects.

use crate::artifact::Artifact;
use crate::error::{RelayError, SupervisorError, TargetError};
use crate::supervisor::{ChannelReadError, InvocationResult, StreamBuffer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Result of running the tool for one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetOutcome {
    /// 1-indexed position in the request.
    pub index: usize,
    pub target: String,
    /// `None` when the tool never ran to an exit (launch failure, deadline).
    pub exit_code: Option<i32>,
    pub stdout: StreamBuffer,
    pub stderr: StreamBuffer,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub read_errors: Vec<ChannelReadError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TargetError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    pub duration_ms: u64,
}

impl TargetOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Fold a supervisor result into an outcome, keeping captured output on
    /// both the success and the failure path.
    pub fn from_run(
        index: usize,
        target: impl Into<String>,
        run: Result<InvocationResult, SupervisorError>,
        duration_ms: u64,
    ) -> Self {
        let target = target.into();
        match run.and_then(InvocationResult::into_result) {
            Ok(result) => Self {
                index,
                target,
                exit_code: Some(result.exit_code),
                stdout: result.stdout,
                stderr: result.stderr,
                read_errors: result.read_errors,
                error: None,
                artifact: None,
                duration_ms,
            },
            Err(err) => {
                let error = TargetError::from(&err);
                let (exit_code, stdout, stderr, read_errors) = match err {
                    SupervisorError::NonZeroExit {
                        exit_code,
                        stdout,
                        stderr,
                        read_errors,
                        ..
                    } => (Some(exit_code), stdout, stderr, read_errors),
                    SupervisorError::DeadlineExceeded {
                        stdout,
                        stderr,
                        read_errors,
                        ..
                    } => (None, stdout, stderr, read_errors),
                    SupervisorError::LaunchFailure { .. } | SupervisorError::Wait { .. } => (
                        None,
                        StreamBuffer::default(),
                        StreamBuffer::default(),
                        Vec::new(),
                    ),
                };
                Self {
                    index,
                    target,
                    exit_code,
                    stdout,
                    stderr,
                    read_errors,
                    error: Some(error),
                    artifact: None,
                    duration_ms,
                }
            }
        }
    }
}

/// Aggregate statistics for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub total_targets: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_duration_ms: u64,
}

/// Everything the handler learned about a request.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerOutput {
    /// In target order.
    pub outcomes: Vec<TargetOutcome>,
    pub stats: RelayStats,
}

impl HandlerOutput {
    pub fn new(mut outcomes: Vec<TargetOutcome>, total_duration_ms: u64) -> Self {
        outcomes.sort_by_key(|o| o.index);
        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        let stats = RelayStats {
            total_targets: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            total_duration_ms,
        };
        Self { outcomes, stats }
    }

    /// True only if every target succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.stats.failed == 0
    }

    pub fn status_code(&self) -> u16 {
        if self.all_succeeded() {
            200
        } else {
            500
        }
    }

    /// Build the trigger response.
    ///
    /// A single successful target that produced a PDF is returned as the
    /// base64 body itself; anything else gets a JSON summary keyed by target.
    pub fn to_response(&self) -> Result<Response, RelayError> {
        if let [only] = self.outcomes.as_slice() {
            if let (true, Some(artifact)) = (only.succeeded(), only.artifact.as_ref()) {
                return Ok(Response::artifact(artifact));
            }
        }

        let mut successes = Map::new();
        let mut failures = Map::new();
        for outcome in &self.outcomes {
            let mut entry = serde_json::to_value(outcome)
                .map_err(|e| RelayError::Internal(format!("serialise outcome: {e}")))?;
            if let Value::Object(ref mut fields) = entry {
                fields.remove("target");
                fields.remove("index");
            }
            let bucket = if outcome.succeeded() {
                &mut successes
            } else {
                &mut failures
            };
            let key = if bucket.contains_key(&outcome.target) {
                format!("{} (#{})", outcome.target, outcome.index)
            } else {
                outcome.target.clone()
            };
            bucket.insert(key, entry);
        }

        let body = serde_json::json!({
            "successes": successes,
            "failures": failures,
            "stats": self.stats,
        });
        let body = serde_json::to_string(&body)
            .map_err(|e| RelayError::Internal(format!("serialise response: {e}")))?;

        Ok(Response::json(self.status_code(), body))
    }
}

/// Proxy-integration response shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
}

impl Response {
    pub fn json(status_code: u16, body: String) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            status_code,
            headers,
            body,
            is_base64_encoded: false,
        }
    }

    pub fn artifact(artifact: &Artifact) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), artifact.content_type.clone());
        headers.insert(
            "Content-Disposition".to_string(),
            format!(
                "attachment; filename=\"{}\"",
                artifact.file_name.replace('"', "")
            ),
        );
        Self {
            status_code: 200,
            headers,
            body: artifact.to_base64(),
            is_base64_encoded: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::PDF_CONTENT_TYPE;
    use crate::supervisor::Channel;

    fn buffer(text: &str) -> StreamBuffer {
        let mut b = StreamBuffer::default();
        b.append(text.as_bytes());
        b
    }

    fn ok_run(stdout: &str) -> Result<InvocationResult, SupervisorError> {
        Ok(InvocationResult {
            program: "p2r".into(),
            exit_code: 0,
            stdout: buffer(stdout),
            stderr: StreamBuffer::default(),
            read_errors: Vec::new(),
            duration_ms: 1,
        })
    }

    fn failed_run(code: i32, stderr: &str) -> Result<InvocationResult, SupervisorError> {
        Ok(InvocationResult {
            program: "p2r".into(),
            exit_code: code,
            stdout: StreamBuffer::default(),
            stderr: buffer(stderr),
            read_errors: Vec::new(),
            duration_ms: 1,
        })
    }

    #[test]
    fn nonzero_exit_outcome_keeps_diagnostics() {
        let o = TargetOutcome::from_run(1, "a.pdf", failed_run(1, "no such paper\n"), 5);
        assert!(!o.succeeded());
        assert_eq!(o.exit_code, Some(1));
        assert_eq!(o.stderr.to_string_lossy(), "no such paper\n");
        assert_eq!(o.error, Some(TargetError::NonZeroExit { exit_code: 1 }));
    }

    #[test]
    fn deadline_outcome_keeps_partial_output() {
        let run = Err(SupervisorError::DeadlineExceeded {
            program: "p2r".into(),
            elapsed_ms: 1000,
            stdout: buffer("downloading...\n"),
            stderr: StreamBuffer::default(),
            read_errors: vec![ChannelReadError {
                channel: Channel::Stdout,
                detail: "Input/output error".into(),
            }],
        });
        let o = TargetOutcome::from_run(1, "a.pdf", run, 1000);
        assert_eq!(o.exit_code, None);
        assert_eq!(o.stdout.to_string_lossy(), "downloading...\n");
        assert_eq!(o.error, Some(TargetError::Deadline { elapsed_ms: 1000 }));
        assert_eq!(o.read_errors.len(), 1);
    }

    #[test]
    fn failed_outcome_keeps_read_errors() {
        let run = Ok(InvocationResult {
            program: "p2r".into(),
            exit_code: 1,
            stdout: StreamBuffer::default(),
            stderr: buffer("partial"),
            read_errors: vec![ChannelReadError {
                channel: Channel::Stderr,
                detail: "EIO".into(),
            }],
            duration_ms: 1,
        });
        let o = TargetOutcome::from_run(1, "a.pdf", run, 1);
        assert!(!o.succeeded());
        assert_eq!(o.read_errors.len(), 1);
        assert_eq!(o.read_errors[0].channel, Channel::Stderr);
        assert_eq!(o.read_errors[0].detail, "EIO");

        let out = HandlerOutput::new(vec![o], 1);
        let body: Value = serde_json::from_str(&out.to_response().unwrap().body).unwrap();
        assert_eq!(body["failures"]["a.pdf"]["read_errors"][0]["channel"], "stderr");
    }

    #[test]
    fn any_failure_makes_status_500() {
        let out = HandlerOutput::new(
            vec![
                TargetOutcome::from_run(2, "b.pdf", failed_run(2, "x"), 1),
                TargetOutcome::from_run(1, "a.pdf", ok_run("done\n"), 1),
            ],
            2,
        );
        assert_eq!(out.outcomes[0].target, "a.pdf");
        assert_eq!(out.stats.succeeded, 1);
        assert_eq!(out.stats.failed, 1);
        assert_eq!(out.status_code(), 500);

        let resp = out.to_response().unwrap();
        assert_eq!(resp.status_code, 500);
        assert!(!resp.is_base64_encoded);
        let body: Value = serde_json::from_str(&resp.body).unwrap();
        assert_eq!(body["successes"]["a.pdf"]["stdout"], "done\n");
        assert_eq!(body["failures"]["b.pdf"]["exit_code"], 2);
        assert_eq!(body["failures"]["b.pdf"]["error"]["kind"], "non_zero_exit");
    }

    #[test]
    fn duplicate_targets_do_not_overwrite() {
        let out = HandlerOutput::new(
            vec![
                TargetOutcome::from_run(1, "a.pdf", ok_run("1"), 1),
                TargetOutcome::from_run(2, "a.pdf", ok_run("2"), 1),
            ],
            2,
        );
        let body: Value = serde_json::from_str(&out.to_response().unwrap().body).unwrap();
        assert_eq!(body["successes"]["a.pdf"]["stdout"], "1");
        assert_eq!(body["successes"]["a.pdf (#2)"]["stdout"], "2");
    }

    #[test]
    fn single_artifact_is_returned_as_base64_body() {
        let mut o = TargetOutcome::from_run(1, "a.pdf", ok_run(""), 1);
        o.artifact = Some(Artifact {
            file_name: "Paper_.pdf".into(),
            content_type: PDF_CONTENT_TYPE.into(),
            size_bytes: 4,
            data: b"%PDF".to_vec(),
        });
        let resp = HandlerOutput::new(vec![o], 1).to_response().unwrap();
        assert_eq!(resp.status_code, 200);
        assert!(resp.is_base64_encoded);
        assert_eq!(resp.body, "JVBERg==");
        assert_eq!(resp.headers["Content-Type"], "application/pdf");
        assert!(resp.headers["Content-Disposition"].contains("Paper_.pdf"));

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["isBase64Encoded"], true);
    }
}
