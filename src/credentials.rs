//! rmapi credential staging.
//!
//! The tool uploads through rmapi, which reads its tokens from a config file
//! named by `RMAPI_CONFIG`. We write that file into a request-owned temp
//! directory and hand its path to each child through the invocation's
//! environment; the handler's own environment is left alone. The directory
//! (and the tokens in it) is removed when [`StagedCredentials`] is dropped.

use crate::config::RmapiCredentials;
use crate::error::RelayError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Environment variable rmapi reads its config path from.
pub const RMAPI_CONFIG_ENV: &str = "RMAPI_CONFIG";

const CONFIG_FILE_NAME: &str = "rmapi.conf";

/// A written rmapi config file, alive as long as this value is.
#[derive(Debug)]
pub struct StagedCredentials {
    path: PathBuf,
    _dir: TempDir,
}

impl StagedCredentials {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `(RMAPI_CONFIG, path)` pair for [`crate::supervisor::Invocation::env`].
    pub fn env_pair(&self) -> (&'static str, &Path) {
        (RMAPI_CONFIG_ENV, &self.path)
    }
}

/// Render the config file body.
pub fn render_config(creds: &RmapiCredentials) -> String {
    format!(
        "usertoken: {}\ndevicetoken: {}\n",
        creds.user_token, creds.device_token
    )
}

/// Write `creds` to a fresh `rmapi.conf` under `root`.
pub async fn stage(creds: &RmapiCredentials, root: &Path) -> Result<StagedCredentials, RelayError> {
    let dir = tempfile::Builder::new()
        .prefix("p2r-rmapi-")
        .tempdir_in(root)
        .map_err(|source| RelayError::CredentialsWriteFailed {
            path: root.to_path_buf(),
            source,
        })?;
    let path = dir.path().join(CONFIG_FILE_NAME);

    tokio::fs::write(&path, render_config(creds))
        .await
        .map_err(|source| RelayError::CredentialsWriteFailed {
            path: path.clone(),
            source,
        })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|source| RelayError::CredentialsWriteFailed {
                path: path.clone(),
                source,
            })?;
    }

    debug!("Stored rmapi credentials in '{}'", path.display());
    Ok(StagedCredentials { path, _dir: dir })
}
