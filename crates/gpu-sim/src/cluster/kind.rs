use std::path::Path;
use std::sync::Arc;

use error_stack::Report;

use crate::runtime::CommandRunner;
use crate::runtime::Invocation;
use crate::runtime::RuntimeError;
use crate::runtime::RuntimeKind;

/// The `kind` CLI, bound to the container runtime it should drive.
#[derive(Clone)]
pub(crate) struct KindCli {
    runtime: RuntimeKind,
    runner: Arc<dyn CommandRunner>,
}

impl KindCli {
    pub(crate) fn new(runtime: RuntimeKind, runner: Arc<dyn CommandRunner>) -> Self {
        Self { runtime, runner }
    }

    fn command(&self) -> Invocation {
        let invocation = Invocation::new("kind");
        match self.runtime {
            RuntimeKind::Docker => invocation,
            RuntimeKind::Podman => invocation.env("KIND_EXPERIMENTAL_PROVIDER", "podman"),
        }
    }

    /// Names of the existing kind clusters.
    pub(crate) async fn clusters(&self) -> Result<Vec<String>, Report<RuntimeError>> {
        let stdout = self
            .runner
            .run(&self.command().args(["get", "clusters"]))
            .await?;
        Ok(non_empty_lines(&stdout))
    }

    pub(crate) async fn exists(&self, name: &str) -> Result<bool, Report<RuntimeError>> {
        Ok(self.clusters().await?.iter().any(|cluster| cluster == name))
    }

    pub(crate) async fn create(&self, name: &str, config: &Path) -> Result<(), Report<RuntimeError>> {
        let invocation = self.command().args([
            "create".to_string(),
            "cluster".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--config".to_string(),
            config.display().to_string(),
        ]);
        self.runner.run(&invocation).await?;
        Ok(())
    }

    pub(crate) async fn delete(&self, name: &str) -> Result<(), Report<RuntimeError>> {
        self.runner
            .run(&self.command().args(["delete", "cluster", "--name", name]))
            .await?;
        Ok(())
    }

    /// Container names of the cluster's nodes.
    pub(crate) async fn nodes(&self, name: &str) -> Result<Vec<String>, Report<RuntimeError>> {
        let stdout = self
            .runner
            .run(&self.command().args(["get", "nodes", "--name", name]))
            .await?;
        Ok(non_empty_lines(&stdout))
    }
}

/// Kubeconfig context kind writes for a cluster.
pub(crate) fn kube_context(cluster: &str) -> String {
    format!("kind-{cluster}")
}

fn non_empty_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::runtime::mock::MockRunner;

    #[test(tokio::test)]
    async fn podman_sets_experimental_provider() {
        let runner = Arc::new(MockRunner::new(|_| MockRunner::ok("gpu-sim-worker\n")));
        let kind = KindCli::new(RuntimeKind::Podman, runner.clone());

        kind.nodes("gpu-sim").await.unwrap();

        assert_eq!(
            runner.command_lines(),
            vec!["KIND_EXPERIMENTAL_PROVIDER=podman kind get nodes --name gpu-sim"]
        );
    }

    #[test(tokio::test)]
    async fn exists_matches_whole_names() {
        let runner = Arc::new(MockRunner::new(|_| MockRunner::ok("kind\ngpu-sim-2\n\n")));
        let kind = KindCli::new(RuntimeKind::Docker, runner);

        assert!(kind.exists("gpu-sim-2").await.unwrap());
        assert!(!kind.exists("gpu-sim").await.unwrap());
    }

    #[test(tokio::test)]
    async fn create_passes_config_file() {
        let runner = Arc::new(MockRunner::succeeding());
        let kind = KindCli::new(RuntimeKind::Docker, runner.clone());

        kind.create("gpu-sim", Path::new(".gpu-sim/gpu-sim-config.yaml"))
            .await
            .unwrap();

        assert_eq!(
            runner.command_lines(),
            vec!["kind create cluster --name gpu-sim --config .gpu-sim/gpu-sim-config.yaml"]
        );
    }

    #[test]
    fn context_name() {
        assert_eq!(kube_context("gpu-sim"), "kind-gpu-sim");
    }
}
