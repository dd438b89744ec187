//! What to run, where, and until when.
//!
//! Arguments are discrete `OsString`s handed straight to the OS; there is no
//! `sh -c` anywhere, so target URLs and paths cannot be reinterpreted by a
//! shell.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use super::Deadline;

/// One supervised run of an external program.
///
/// # Example
/// ```rust
/// use p2r_relay::supervisor::{Deadline, Invocation};
/// use std::time::Duration;
///
/// let inv = Invocation::new("p2r", "/tmp", Deadline::after(Duration::from_secs(60)))
///     .arg("--verbose")
///     .arg("https://arxiv.org/abs/1706.03762")
///     .env("RMAPI_CONFIG", "/tmp/rmapi.conf");
///
/// assert_eq!(inv.args.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Program name (looked up on `PATH`) or path.
    pub program: OsString,
    /// Arguments, passed verbatim and in order.
    pub args: Vec<OsString>,
    /// Directory the child starts in. Must exist.
    pub working_dir: PathBuf,
    /// Extra environment for the child only; the parent's env is inherited
    /// and never mutated.
    pub envs: Vec<(OsString, OsString)>,
    pub deadline: Deadline,
}

impl Invocation {
    pub fn new(
        program: impl Into<OsString>,
        working_dir: impl Into<PathBuf>,
        deadline: Deadline,
    ) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            envs: Vec::new(),
            deadline,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Program name for logs and error messages.
    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Build the tokio command: both output channels piped, stdin closed,
    /// child killed if the handle is dropped.
    ///
    /// On Unix the child leads a new process group (pgid = its pid) so a
    /// deadline kill also reaches everything it started.
    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn builder_keeps_argument_order() {
        let inv = Invocation::new("p2r", "/tmp", Deadline::after(Duration::from_secs(1)))
            .arg("--verbose")
            .args(["--remarkable-path", "/Papers"])
            .arg("paper.pdf");
        let args: Vec<String> = inv
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["--verbose", "--remarkable-path", "/Papers", "paper.pdf"]
        );
    }

    #[test]
    fn arguments_are_not_shell_split() {
        let inv = Invocation::new("p2r", "/tmp", Deadline::after(Duration::from_secs(1)))
            .arg("a b; rm -rf /");
        assert_eq!(inv.args.len(), 1);
    }

    #[test]
    fn program_name_is_lossy_text() {
        let inv = Invocation::new("/usr/local/bin/p2r", "/tmp", Deadline::after(Duration::ZERO))
            .env("RMAPI_CONFIG", "/tmp/x");
        assert_eq!(inv.program_name(), "/usr/local/bin/p2r");
        assert_eq!(inv.envs.len(), 1);
    }
}
