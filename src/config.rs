//! Configuration for the request handler.
//!
//! All handler behaviour is controlled through [`RelayConfig`], built via its
//! [`RelayConfigBuilder`] or read from the environment with
//! [`RelayConfig::from_env`]. Per-request options (which flags to pass to the
//! tool) come from the payload instead; see [`crate::payload`].

use crate::error::RelayError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// rmapi account tokens staged into a config file for the tool.
#[derive(Clone, PartialEq, Eq)]
pub struct RmapiCredentials {
    pub user_token: String,
    pub device_token: String,
}

// Tokens never reach logs.
impl fmt::Debug for RmapiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RmapiCredentials")
            .field("user_token", &"<redacted>")
            .field("device_token", &"<redacted>")
            .finish()
    }
}

impl RmapiCredentials {
    /// Read `RMAPI_USER_TOKEN` / `RMAPI_DEVICE_TOKEN`.
    ///
    /// Neither set → `Ok(None)`. Exactly one set → `CredentialsMissing`.
    pub fn from_env() -> Result<Option<Self>, RelayError> {
        let user = non_empty_var("RMAPI_USER_TOKEN");
        let device = non_empty_var("RMAPI_DEVICE_TOKEN");
        match (user, device) {
            (Some(user_token), Some(device_token)) => Ok(Some(Self {
                user_token,
                device_token,
            })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(RelayError::CredentialsMissing {
                missing: "RMAPI_DEVICE_TOKEN",
            }),
            (None, Some(_)) => Err(RelayError::CredentialsMissing {
                missing: "RMAPI_USER_TOKEN",
            }),
        }
    }
}

/// Configuration for handling a request.
///
/// # Example
/// ```rust
/// use p2r_relay::RelayConfig;
///
/// let config = RelayConfig::builder()
///     .program("/opt/bin/p2r")
///     .default_timeout_secs(300)
///     .build()
///     .unwrap();
/// assert_eq!(config.program, "/opt/bin/p2r");
/// ```
#[derive(Clone)]
pub struct RelayConfig {
    /// Tool to run. Default: `p2r`.
    pub program: String,

    /// Directory under which each target gets a fresh working directory.
    /// Default: the system temp dir.
    pub work_root: PathBuf,

    /// Request budget when the caller does not supply a deadline. Default: 900.
    pub default_timeout_secs: u64,

    /// Reserve kept back from a platform-reported remaining budget so the
    /// handler can still build its response. Default: 2000.
    pub safety_margin_ms: u64,

    /// Targets run at once. Default: 1 (sequential, one tool run per target).
    pub concurrency: usize,

    /// Scan each working directory for a produced PDF. Default: true.
    pub collect_artifacts: bool,

    /// Staged into `rmapi.conf` when present.
    pub credentials: Option<RmapiCredentials>,

    /// Optional per-target progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            program: "p2r".to_string(),
            work_root: std::env::temp_dir(),
            default_timeout_secs: 900,
            safety_margin_ms: 2000,
            concurrency: 1,
            collect_artifacts: true,
            credentials: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("program", &self.program)
            .field("work_root", &self.work_root)
            .field("default_timeout_secs", &self.default_timeout_secs)
            .field("safety_margin_ms", &self.safety_margin_ms)
            .field("concurrency", &self.concurrency)
            .field("collect_artifacts", &self.collect_artifacts)
            .field("credentials", &self.credentials)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RelayProgressCallback>"),
            )
            .finish()
    }
}

impl RelayConfig {
    /// Create a new builder for `RelayConfig`.
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build from environment variables:
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `P2R_PROGRAM` | `program` |
    /// | `P2R_WORK_ROOT` | `work_root` |
    /// | `P2R_TIMEOUT_SECS` | `default_timeout_secs` |
    /// | `RMAPI_USER_TOKEN` + `RMAPI_DEVICE_TOKEN` | `credentials` |
    pub fn from_env() -> Result<Self, RelayError> {
        let mut builder = Self::builder();
        if let Some(program) = non_empty_var("P2R_PROGRAM") {
            builder = builder.program(program);
        }
        if let Some(root) = non_empty_var("P2R_WORK_ROOT") {
            builder = builder.work_root(root);
        }
        if let Some(secs) = non_empty_var("P2R_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|e| {
                RelayError::InvalidConfig(format!("P2R_TIMEOUT_SECS '{secs}': {e}"))
            })?;
            builder = builder.default_timeout_secs(secs);
        }
        if let Some(creds) = RmapiCredentials::from_env()? {
            builder = builder.credentials(creds);
        }
        builder.build()
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.safety_margin_ms)
    }
}

/// Builder for [`RelayConfig`].
#[derive(Debug)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.config.program = program.into();
        self
    }

    pub fn work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.work_root = root.into();
        self
    }

    pub fn default_timeout_secs(mut self, secs: u64) -> Self {
        self.config.default_timeout_secs = secs;
        self
    }

    pub fn safety_margin_ms(mut self, ms: u64) -> Self {
        self.config.safety_margin_ms = ms;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn collect_artifacts(mut self, v: bool) -> Self {
        self.config.collect_artifacts = v;
        self
    }

    pub fn credentials(mut self, creds: RmapiCredentials) -> Self {
        self.config.credentials = Some(creds);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RelayConfig, RelayError> {
        let c = &self.config;
        if c.program.trim().is_empty() {
            return Err(RelayError::InvalidConfig("program must not be empty".into()));
        }
        if c.default_timeout_secs == 0 {
            return Err(RelayError::InvalidConfig(
                "default timeout must be at least 1 second".into(),
            ));
        }
        if let Some(ref creds) = c.credentials {
            if creds.user_token.is_empty() || creds.device_token.is_empty() {
                return Err(RelayError::InvalidConfig(
                    "rmapi tokens must not be empty".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = RelayConfig::default();
        assert_eq!(c.program, "p2r");
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.safety_margin(), Duration::from_secs(2));
        assert!(c.collect_artifacts);
        assert!(c.credentials.is_none());
    }

    #[test]
    fn concurrency_is_clamped_to_one() {
        let c = RelayConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn empty_program_is_rejected() {
        let err = RelayConfig::builder().program("  ").build().unwrap_err();
        assert!(matches!(err, RelayError::InvalidConfig(_)));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(RelayConfig::builder().default_timeout_secs(0).build().is_err());
    }

    #[test]
    fn credentials_are_redacted_in_debug() {
        let c = RelayConfig::builder()
            .credentials(RmapiCredentials {
                user_token: "secret-user".into(),
                device_token: "secret-device".into(),
            })
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret-user"));
        assert!(!dbg.contains("secret-device"));
        assert!(dbg.contains("<redacted>"));
    }
}
