//! Container runtime collaborator.
//!
//! Every call shells out to `docker` or `podman` through a [`CommandRunner`].

pub(crate) mod command;
#[cfg(test)]
pub(crate) mod mock;
pub(crate) mod types;

use std::path::Path;
use std::sync::Arc;

use error_stack::Report;
use tracing::info;

pub(crate) use command::CommandOutput;
pub(crate) use command::CommandRunner;
pub(crate) use command::Invocation;
pub(crate) use command::SystemRunner;
pub(crate) use types::RuntimeError;

/// Whether `stderr` of a failed `inspect` reports an unknown object. Docker
/// says `No such object` or `No such container`, podman the same in lower
/// case.
fn is_not_found(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such object") || stderr.contains("no such container")
}

/// Supported container runtimes, in detection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum RuntimeKind {
    Docker,
    Podman,
}

impl RuntimeKind {
    pub(crate) const ALL: [RuntimeKind; 2] = [RuntimeKind::Docker, RuntimeKind::Podman];

    pub(crate) fn binary(self) -> &'static str {
        match self {
            RuntimeKind::Docker => "docker",
            RuntimeKind::Podman => "podman",
        }
    }

    /// Picks the runtime to use.
    ///
    /// A `preferred` runtime must be installed; otherwise the first installed
    /// runtime in [`RuntimeKind::ALL`] order wins.
    pub(crate) fn detect(
        preferred: Option<RuntimeKind>,
        is_installed: impl Fn(&str) -> bool,
    ) -> Result<RuntimeKind, Report<RuntimeError>> {
        let candidates: Vec<RuntimeKind> = match preferred {
            Some(kind) => vec![kind],
            None => Self::ALL.to_vec(),
        };

        candidates
            .iter()
            .copied()
            .find(|kind| is_installed(kind.binary()))
            .ok_or_else(|| {
                Report::new(RuntimeError::NoRuntime {
                    tried: candidates
                        .iter()
                        .map(|kind| kind.binary())
                        .collect::<Vec<_>>()
                        .join(", "),
                })
            })
    }
}

/// Whether `tool` resolves to an executable on `PATH`.
pub(crate) fn on_path(tool: &str) -> bool {
    which::which(tool).is_ok()
}

/// Observed state of a named container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContainerState {
    Running,
    Stopped,
}

/// Options for [`ContainerRuntime::run_detached`].
#[derive(Debug, Clone, Default)]
pub(crate) struct RunSpec<'a> {
    pub(crate) name: &'a str,
    pub(crate) image: &'a str,
    /// `host:container` port publication, e.g. `127.0.0.1:5001:5000`
    pub(crate) publish: Option<String>,
    pub(crate) network: Option<&'a str>,
    pub(crate) restart: Option<&'a str>,
}

/// A container runtime CLI.
#[derive(Clone)]
pub(crate) struct ContainerRuntime {
    kind: RuntimeKind,
    runner: Arc<dyn CommandRunner>,
}

impl ContainerRuntime {
    pub(crate) fn new(kind: RuntimeKind, runner: Arc<dyn CommandRunner>) -> Self {
        Self { kind, runner }
    }

    fn command(&self) -> Invocation {
        Invocation::new(self.kind.binary())
    }

    /// `None` when no container with that name exists. Any other inspect
    /// failure, such as an unreachable daemon, is an error.
    pub(crate) async fn container_state(
        &self,
        name: &str,
    ) -> Result<Option<ContainerState>, Report<RuntimeError>> {
        let invocation = self
            .command()
            .args(["inspect", "-f", "{{.State.Running}}", name]);
        let output = self.runner.output(&invocation).await?;

        if !output.success() {
            if is_not_found(&output.stderr) {
                return Ok(None);
            }
            return Err(Report::new(RuntimeError::CommandFailed {
                command: invocation.to_string(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            }));
        }
        Ok(Some(if output.stdout.trim() == "true" {
            ContainerState::Running
        } else {
            ContainerState::Stopped
        }))
    }

    pub(crate) async fn run_detached(&self, spec: &RunSpec<'_>) -> Result<(), Report<RuntimeError>> {
        let mut invocation = self.command().args(["run", "-d", "--name", spec.name]);
        if let Some(restart) = spec.restart {
            invocation = invocation.arg(format!("--restart={restart}"));
        }
        if let Some(publish) = &spec.publish {
            invocation = invocation.args(["-p", publish.as_str()]);
        }
        if let Some(network) = spec.network {
            invocation = invocation.args(["--network", network]);
        }
        self.runner.run(&invocation.arg(spec.image)).await?;
        info!(container = spec.name, image = spec.image, "container started");
        Ok(())
    }

    pub(crate) async fn start(&self, name: &str) -> Result<(), Report<RuntimeError>> {
        self.runner.run(&self.command().args(["start", name])).await?;
        Ok(())
    }

    pub(crate) async fn stop(&self, name: &str) -> Result<(), Report<RuntimeError>> {
        self.runner.run(&self.command().args(["stop", name])).await?;
        Ok(())
    }

    pub(crate) async fn remove(&self, name: &str) -> Result<(), Report<RuntimeError>> {
        self.runner.run(&self.command().args(["rm", name])).await?;
        Ok(())
    }

    /// Run `cmd` inside a running container and return its stdout.
    pub(crate) async fn exec(
        &self,
        container: &str,
        cmd: &[&str],
    ) -> Result<String, Report<RuntimeError>> {
        self.runner
            .run(&self.command().args(["exec", container]).args(cmd.iter().copied()))
            .await
    }

    /// Whether the container is attached to `network`.
    pub(crate) async fn is_connected(
        &self,
        container: &str,
        network: &str,
    ) -> Result<bool, Report<RuntimeError>> {
        let format = format!("{{{{json .NetworkSettings.Networks.{network}}}}}");
        let stdout = self
            .runner
            .run(&self.command().args(["inspect", "-f", format.as_str(), container]))
            .await?;
        let attachment = stdout.trim();
        Ok(!attachment.is_empty() && attachment != "null")
    }

    pub(crate) async fn network_connect(
        &self,
        network: &str,
        container: &str,
    ) -> Result<(), Report<RuntimeError>> {
        self.runner
            .run(&self.command().args(["network", "connect", network, container]))
            .await?;
        Ok(())
    }

    pub(crate) async fn build(
        &self,
        context: &Path,
        file: &Path,
        tag: &str,
    ) -> Result<(), Report<RuntimeError>> {
        let invocation = self.command().args([
            "build".to_string(),
            "-t".to_string(),
            tag.to_string(),
            "-f".to_string(),
            file.display().to_string(),
            context.display().to_string(),
        ]);
        self.runner.run(&invocation).await?;
        info!(image = tag, "image built");
        Ok(())
    }

    pub(crate) async fn tag(&self, source: &str, target: &str) -> Result<(), Report<RuntimeError>> {
        self.runner
            .run(&self.command().args(["tag", source, target]))
            .await?;
        Ok(())
    }

    pub(crate) async fn save(&self, image: &str, archive: &Path) -> Result<(), Report<RuntimeError>> {
        let invocation = self.command().args([
            "save".to_string(),
            "-o".to_string(),
            archive.display().to_string(),
            image.to_string(),
        ]);
        self.runner.run(&invocation).await?;
        info!(image, archive = %archive.display(), "image saved");
        Ok(())
    }

    pub(crate) async fn pull(&self, image: &str) -> Result<(), Report<RuntimeError>> {
        self.runner.run(&self.command().args(["pull", image])).await?;
        Ok(())
    }

    /// Push to a registry; the local registry speaks plain HTTP, which podman
    /// refuses unless TLS verification is disabled.
    pub(crate) async fn push(&self, image: &str) -> Result<(), Report<RuntimeError>> {
        let mut invocation = self.command().arg("push");
        if self.kind == RuntimeKind::Podman && image.starts_with("localhost:") {
            invocation = invocation.arg("--tls-verify=false");
        }
        self.runner.run(&invocation.arg(image)).await?;
        info!(image, "image pushed");
        Ok(())
    }
}
