use std::fmt;
use std::process::Stdio;

use error_stack::Report;
use error_stack::ResultExt;
use tokio::process::Command;
use tracing::debug;

use crate::runtime::RuntimeError;

/// A fully specified external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Invocation {
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
    pub(crate) env: Vec<(String, String)>,
}

impl Invocation {
    pub(crate) fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub(crate) fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub(crate) fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub(crate) fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{key}={value} ")?;
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub(crate) code: Option<i32>,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

impl CommandOutput {
    pub(crate) fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external programs.
#[async_trait::async_trait]
pub(crate) trait CommandRunner: Send + Sync {
    /// Run to completion and capture the output, whatever the exit code.
    async fn output(&self, invocation: &Invocation) -> Result<CommandOutput, Report<RuntimeError>>;

    /// Run to completion, failing on a non-zero exit code. Returns stdout.
    async fn run(&self, invocation: &Invocation) -> Result<String, Report<RuntimeError>> {
        let output = self.output(invocation).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(Report::new(RuntimeError::CommandFailed {
                command: invocation.to_string(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            }))
        }
    }
}

/// [`CommandRunner`] spawning real processes.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemRunner;

#[async_trait::async_trait]
impl CommandRunner for SystemRunner {
    async fn output(&self, invocation: &Invocation) -> Result<CommandOutput, Report<RuntimeError>> {
        debug!(command = %invocation, "running");

        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .output()
            .await
            .change_context(RuntimeError::Spawn {
                command: invocation.to_string(),
            })?;

        let output = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(command = %invocation, code = ?output.code, "finished");
        Ok(output)
    }
}
