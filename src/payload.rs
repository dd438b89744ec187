//! Request payload parsing and the payload → tool argv mapping.
//!
//! Events arrive in one of two shapes:
//!
//! * **Direct invocation**: the event *is* the payload object.
//! * **API Gateway proxy**: the payload is JSON text in the event's `body`
//!   field, base64-encoded when `isBase64Encoded` is true.
//!
//! Every payload names one or more targets (URLs or paths the tool
//! understands) and a set of options, each of which maps 1:1 onto a tool
//! flag. The same flags are used for every target in the request.

use crate::error::RelayError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_true() -> bool {
    true
}

/// Options forwarded to the tool as flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOptions {
    /// `--verbose`. Default: true, so diagnostics end up in the captured output.
    #[serde(default = "default_true")]
    pub verbose: bool,
    /// `--blank`
    #[serde(default)]
    pub blank: bool,
    /// `--center`
    #[serde(default)]
    pub center: bool,
    /// `--right`
    #[serde(default)]
    pub right: bool,
    /// `--no-crop`
    #[serde(default)]
    pub disable_cropping: bool,
    /// `--no-upload`: the tool leaves the PDF in its working directory
    /// instead of uploading it.
    #[serde(default)]
    pub no_upload: bool,
    /// `--remarkable-path <path>`
    #[serde(default)]
    pub remarkable_path: Option<String>,
    /// `--filename <path>`
    #[serde(default)]
    pub filename: Option<String>,
}

impl Default for ToolOptions {
    fn default() -> Self {
        Self {
            verbose: true,
            blank: false,
            center: false,
            right: false,
            disable_cropping: false,
            no_upload: false,
            remarkable_path: None,
            filename: None,
        }
    }
}

impl ToolOptions {
    /// Flags in a fixed order. Empty string options count as unset.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let switches = [
            (self.verbose, "--verbose"),
            (self.blank, "--blank"),
            (self.center, "--center"),
            (self.right, "--right"),
            (self.disable_cropping, "--no-crop"),
            (self.no_upload, "--no-upload"),
        ];
        for (on, flag) in switches {
            if on {
                args.push(flag.to_string());
            }
        }
        if let Some(path) = self.remarkable_path.as_deref().filter(|p| !p.is_empty()) {
            args.push("--remarkable-path".to_string());
            args.push(path.to_string());
        }
        if let Some(name) = self.filename.as_deref().filter(|n| !n.is_empty()) {
            args.push("--filename".to_string());
            args.push(name.to_string());
        }
        args
    }

    /// Full argv for one target: flags, then the target.
    pub fn argv_for(&self, target: &str) -> Vec<String> {
        let mut argv = self.to_args();
        argv.push(target.to_string());
        argv
    }
}

/// A parsed request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Single target; appended after `inputs` (the shape form-builder
    /// integrations send).
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(flatten)]
    pub options: ToolOptions,
}

impl RequestPayload {
    /// Extract the payload from a raw event in either supported shape.
    pub fn from_event(event: &Value) -> Result<Self, RelayError> {
        let Some(obj) = event.as_object() else {
            return Err(RelayError::InvalidPayload("event is not a JSON object".into()));
        };

        let payload = match obj.get("body") {
            None => event.clone(),
            Some(Value::String(body)) => {
                let encoded = obj
                    .get("isBase64Encoded")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let text = if encoded {
                    let bytes = STANDARD.decode(body.trim()).map_err(|e| {
                        RelayError::InvalidPayload(format!("body is not valid base64: {e}"))
                    })?;
                    String::from_utf8(bytes).map_err(|e| {
                        RelayError::InvalidPayload(format!("decoded body is not UTF-8: {e}"))
                    })?
                } else {
                    body.clone()
                };
                serde_json::from_str(&text)
                    .map_err(|e| RelayError::InvalidPayload(format!("body is not JSON: {e}")))?
            }
            Some(body @ Value::Object(_)) => body.clone(),
            Some(other) => {
                return Err(RelayError::InvalidPayload(format!(
                    "unsupported body type: {}",
                    json_type(other)
                )))
            }
        };

        serde_json::from_value(payload).map_err(|e| RelayError::InvalidPayload(e.to_string()))
    }

    /// Targets in processing order: `inputs`, then `input`. Blank entries
    /// are dropped; a target starting with `-` is rejected since the tool
    /// would parse it as a flag.
    pub fn targets(&self) -> Result<Vec<String>, RelayError> {
        let targets: Vec<String> = self
            .inputs
            .iter()
            .chain(self.input.iter())
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if targets.is_empty() {
            return Err(RelayError::NoTargets);
        }
        if let Some(flag) = targets.iter().find(|t| t.starts_with('-')) {
            return Err(RelayError::InvalidPayload(format!(
                "target '{flag}' looks like a command-line flag"
            )));
        }
        Ok(targets)
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direct_event_defaults_to_verbose() {
        let p = RequestPayload::from_event(&json!({ "inputs": ["https://arxiv.org/abs/1"] })).unwrap();
        assert_eq!(p.options.to_args(), vec!["--verbose"]);
        assert_eq!(p.targets().unwrap(), vec!["https://arxiv.org/abs/1"]);
    }

    #[test]
    fn api_gateway_body_is_parsed() {
        let event = json!({
            "httpMethod": "POST",
            "body": "{\"input\": \"paper.pdf\", \"blank\": true, \"verbose\": false}"
        });
        let p = RequestPayload::from_event(&event).unwrap();
        assert_eq!(p.targets().unwrap(), vec!["paper.pdf"]);
        assert_eq!(p.options.to_args(), vec!["--blank"]);
    }

    #[test]
    fn base64_body_is_decoded() {
        let body = STANDARD.encode(r#"{"inputs": ["a.pdf"], "center": true}"#);
        let event = json!({ "body": body, "isBase64Encoded": true });
        let p = RequestPayload::from_event(&event).unwrap();
        assert_eq!(p.options.to_args(), vec!["--verbose", "--center"]);
    }

    #[test]
    fn malformed_body_is_invalid_payload() {
        let err = RequestPayload::from_event(&json!({ "body": "not json" })).unwrap_err();
        assert!(matches!(err, RelayError::InvalidPayload(_)));

        let err = RequestPayload::from_event(&json!({ "body": null })).unwrap_err();
        assert!(err.to_string().contains("null"));

        let err = RequestPayload::from_event(&json!(["a.pdf"])).unwrap_err();
        assert!(matches!(err, RelayError::InvalidPayload(_)));
    }

    #[test]
    fn input_is_appended_after_inputs() {
        let p = RequestPayload::from_event(&json!({
            "inputs": ["one.pdf", "  ", "two.pdf"],
            "input": "three.pdf"
        }))
        .unwrap();
        assert_eq!(p.targets().unwrap(), vec!["one.pdf", "two.pdf", "three.pdf"]);
    }

    #[test]
    fn flag_like_target_is_rejected() {
        let p = RequestPayload::from_event(&json!({
            "inputs": ["a.pdf", "-rf"]
        }))
        .unwrap();
        match p.targets() {
            Err(RelayError::InvalidPayload(msg)) => assert!(msg.contains("'-rf'"), "got: {msg}"),
            other => panic!("expected InvalidPayload, got {other:?}"),
        }
    }

    #[test]
    fn no_targets_is_an_error() {
        let p = RequestPayload::from_event(&json!({ "blank": true })).unwrap();
        assert!(matches!(p.targets(), Err(RelayError::NoTargets)));
    }

    #[test]
    fn every_option_maps_to_its_flag_in_order() {
        let opts = ToolOptions {
            verbose: true,
            blank: true,
            center: true,
            right: true,
            disable_cropping: true,
            no_upload: true,
            remarkable_path: Some("/Papers".into()),
            filename: Some("out.pdf".into()),
        };
        assert_eq!(
            opts.argv_for("https://example.com/x.pdf"),
            vec![
                "--verbose",
                "--blank",
                "--center",
                "--right",
                "--no-crop",
                "--no-upload",
                "--remarkable-path",
                "/Papers",
                "--filename",
                "out.pdf",
                "https://example.com/x.pdf",
            ]
        );
    }

    #[test]
    fn empty_string_options_are_ignored() {
        let p = RequestPayload::from_event(&json!({
            "input": "a.pdf",
            "verbose": false,
            "remarkable_path": "",
            "filename": ""
        }))
        .unwrap();
        assert!(p.options.to_args().is_empty());
    }
}
