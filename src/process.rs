//! Thin builder over `std::process::Command` for host tool invocations.
//!
//! Every external tool the pipeline touches goes through [`Cmd`] so that
//! failures carry the full command line and are logged the same way.

use anyhow::{Context, Result};
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    envs: Vec<(String, OsString)>,
    current_dir: Option<OsString>,
    error_msg: Option<String>,
    allow_fail: bool,
}

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            error_msg: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn env(mut self, key: &str, value: impl AsRef<OsStr>) -> Self {
        self.envs.push((key.to_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.as_os_str().to_os_string());
        self
    }

    /// Message prefixed to the error when the command fails.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Return the output instead of an error on non-zero exit.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// The command line as a single display string.
    pub fn display(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Run with captured stdout/stderr.
    pub fn run(&self) -> Result<CmdOutput> {
        debug!(command = %self.display(), "running");
        let output = self
            .command()
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to execute '{}'", self.program))?;

        let result = CmdOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if result.success() || self.allow_fail {
            return Ok(result);
        }
        Err(self.failure(result.code, Some(result.stderr.trim())))
    }

    /// Run attached to the terminal and return the exit code.
    pub fn run_interactive(&self) -> Result<i32> {
        debug!(command = %self.display(), "running attached");
        let status = self
            .command()
            .status()
            .with_context(|| format!("failed to execute '{}'", self.program))?;
        let code = status.code().unwrap_or(-1);
        if code == 0 || self.allow_fail {
            return Ok(code);
        }
        Err(self.failure(code, None))
    }

    fn failure(&self, code: i32, stderr: Option<&str>) -> anyhow::Error {
        let err = anyhow::Error::new(PipelineError::CommandFailed {
            command: self.display(),
            status: code,
        });
        let detail = match (self.error_msg.as_deref(), stderr) {
            (Some(msg), Some(stderr)) if !stderr.is_empty() => format!("{msg}: {stderr}"),
            (Some(msg), _) => msg.to_string(),
            (None, Some(stderr)) if !stderr.is_empty() => stderr.to_string(),
            _ => return err,
        };
        err.context(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn display_joins_program_and_args() {
        let cmd = Cmd::new("losetup")
            .args(["--show", "-f"])
            .arg_path(Path::new("/tmp/a.img"));
        assert_eq!(cmd.display(), "losetup --show -f /tmp/a.img");
    }

    #[test]
    fn run_captures_stdout() {
        let out = Cmd::new("echo").arg("hello").run().unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn non_zero_exit_is_collaborator_error() {
        let err = Cmd::new("false").error_msg("false failed").run().unwrap_err();
        let typed = PipelineError::find(&err).unwrap();
        assert_eq!(typed.kind(), ErrorKind::Collaborator);
        assert!(err.to_string().contains("false failed"));
    }

    #[test]
    fn allow_fail_returns_output() {
        let out = Cmd::new("false").allow_fail().run().unwrap();
        assert!(!out.success());
    }
}
