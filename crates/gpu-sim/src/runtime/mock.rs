//! Test double for [`CommandRunner`].
//!
//! Records every invocation and answers through a handler closure.

use std::sync::Mutex;

use error_stack::Report;

use super::CommandOutput;
use super::CommandRunner;
use super::Invocation;
use super::RuntimeError;

type Handler = Box<dyn Fn(&Invocation) -> CommandOutput + Send + Sync>;

pub(crate) struct MockRunner {
    calls: Mutex<Vec<Invocation>>,
    handler: Handler,
}

impl MockRunner {
    pub(crate) fn new(handler: impl Fn(&Invocation) -> CommandOutput + Send + Sync + 'static) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        }
    }

    /// Every command exits 0 with empty output.
    pub(crate) fn succeeding() -> Self {
        Self::new(|_| Self::ok(""))
    }

    pub(crate) fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub(crate) fn failed(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }
}

#[async_trait::async_trait]
impl CommandRunner for MockRunner {
    async fn output(&self, invocation: &Invocation) -> Result<CommandOutput, Report<RuntimeError>> {
        self.calls.lock().unwrap().push(invocation.clone());
        Ok((self.handler)(invocation))
    }
}
