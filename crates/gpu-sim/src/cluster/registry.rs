use std::collections::BTreeMap;

use error_stack::Report;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::info;

use crate::runtime::ContainerRuntime;
use crate::runtime::ContainerState;
use crate::runtime::RunSpec;
use crate::runtime::RuntimeError;

const REGISTRY_IMAGE: &str = "registry:2";
/// Port the registry listens on inside its container.
const REGISTRY_CONTAINER_PORT: u16 = 5000;
/// Docker network kind attaches its node containers to.
pub(crate) const KIND_NETWORK: &str = "kind";

/// A `registry:2` container published on `127.0.0.1:<port>` and mirrored
/// into the kind nodes as `localhost:<port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LocalRegistry {
    pub(crate) name: String,
    pub(crate) port: u16,
}

impl LocalRegistry {
    pub(crate) fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }

    /// Registry host as seen from the host and, through the mirror, the nodes.
    pub(crate) fn host(&self) -> String {
        format!("localhost:{}", self.port)
    }

    /// Starts the registry container, creating it when absent.
    pub(crate) async fn ensure_running(
        &self,
        runtime: &ContainerRuntime,
    ) -> Result<(), Report<RuntimeError>> {
        match runtime.container_state(&self.name).await? {
            Some(ContainerState::Running) => {
                info!(registry = %self.name, "registry already running");
            }
            Some(ContainerState::Stopped) => {
                info!(registry = %self.name, "starting stopped registry");
                runtime.start(&self.name).await?;
            }
            None => {
                runtime
                    .run_detached(&RunSpec {
                        name: &self.name,
                        image: REGISTRY_IMAGE,
                        publish: Some(format!(
                            "127.0.0.1:{}:{REGISTRY_CONTAINER_PORT}",
                            self.port
                        )),
                        network: Some("bridge"),
                        restart: Some("always"),
                    })
                    .await?;
            }
        }
        Ok(())
    }

    /// Contents of the containerd `hosts.toml` redirecting `localhost:<port>`
    /// to the registry container on the kind network.
    fn hosts_toml(&self) -> String {
        format!(
            "[host.\"http://{}:{REGISTRY_CONTAINER_PORT}\"]\n",
            self.name
        )
    }

    /// Writes the registry mirror config into every node, then attaches the
    /// registry to the kind network so the mirror host resolves.
    pub(crate) async fn configure_mirror(
        &self,
        runtime: &ContainerRuntime,
        nodes: &[String],
    ) -> Result<(), Report<RuntimeError>> {
        let dir = format!("/etc/containerd/certs.d/{}", self.host());
        let script = format!(
            "mkdir -p '{dir}' && printf '%s' '{}' > '{dir}/hosts.toml'",
            self.hosts_toml()
        );

        for node in nodes {
            runtime.exec(node, &["sh", "-c", &script]).await?;
            info!(node = %node, host = %self.host(), "registry mirror configured");
        }

        if runtime.is_connected(&self.name, KIND_NETWORK).await? {
            info!(registry = %self.name, "registry already on kind network");
        } else {
            runtime.network_connect(KIND_NETWORK, &self.name).await?;
        }
        Ok(())
    }

    /// Stops and removes the registry container; absent is fine.
    pub(crate) async fn teardown(&self, runtime: &ContainerRuntime) -> Result<(), Report<RuntimeError>> {
        match runtime.container_state(&self.name).await? {
            None => {
                info!(registry = %self.name, "registry not present");
                return Ok(());
            }
            Some(ContainerState::Running) => runtime.stop(&self.name).await?,
            Some(ContainerState::Stopped) => {}
        }
        runtime.remove(&self.name).await?;
        info!(registry = %self.name, "registry removed");
        Ok(())
    }

    /// The `local-registry-hosting` ConfigMap documenting the registry to
    /// in-cluster tooling (KEP-1755).
    pub(crate) fn hosting_config_map(&self) -> ConfigMap {
        let mut data = BTreeMap::new();
        data.insert(
            "localRegistryHosting.v1".to_string(),
            format!(
                "host: \"{}\"\nhelp: \"https://kind.sigs.k8s.io/docs/user/local-registry/\"\n",
                self.host()
            ),
        );

        ConfigMap {
            metadata: ObjectMeta {
                name: Some("local-registry-hosting".to_string()),
                namespace: Some("kube-public".to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    /// Reference of `upstream` once mirrored into this registry.
    ///
    /// The upstream registry host is dropped:
    /// `nvcr.io/nvidia/k8s-device-plugin:v0.17.0` becomes
    /// `localhost:5001/nvidia/k8s-device-plugin:v0.17.0`.
    pub(crate) fn local_reference(&self, upstream: &str) -> String {
        let path = match upstream.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                rest
            }
            _ => upstream,
        };
        format!("{}/{path}", self.host())
    }

    /// Pulls `upstream`, tags it into this registry and pushes it. Returns the
    /// local reference.
    pub(crate) async fn mirror_image(
        &self,
        runtime: &ContainerRuntime,
        upstream: &str,
    ) -> Result<String, Report<RuntimeError>> {
        let local = self.local_reference(upstream);
        runtime.pull(upstream).await?;
        runtime.tag(upstream, &local).await?;
        runtime.push(&local).await?;
        info!(upstream, local = %local, "image mirrored into local registry");
        Ok(local)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::runtime::mock::MockRunner;
    use crate::runtime::RuntimeKind;

    fn registry() -> LocalRegistry {
        LocalRegistry::new("kind-registry", 5001)
    }

    #[test]
    fn local_reference_strips_registry_host() {
        let registry = registry();
        assert_eq!(
            registry.local_reference("nvcr.io/nvidia/k8s-device-plugin:v0.17.0"),
            "localhost:5001/nvidia/k8s-device-plugin:v0.17.0"
        );
        assert_eq!(
            registry.local_reference("docker.io/rocm/k8s-device-plugin:latest"),
            "localhost:5001/rocm/k8s-device-plugin:latest"
        );
        assert_eq!(
            registry.local_reference("rocm/k8s-device-plugin:latest"),
            "localhost:5001/rocm/k8s-device-plugin:latest"
        );
        assert_eq!(
            registry.local_reference("busybox"),
            "localhost:5001/busybox"
        );
    }

    #[test(tokio::test)]
    async fn ensure_running_creates_missing_registry() {
        let runner = Arc::new(MockRunner::new(|invocation| {
            if invocation.args[0] == "inspect" {
                MockRunner::failed(1, "no such container")
            } else {
                MockRunner::ok("")
            }
        }));
        let runtime = ContainerRuntime::new(RuntimeKind::Docker, runner.clone());

        registry().ensure_running(&runtime).await.unwrap();

        assert_eq!(
            runner.command_lines()[1],
            "docker run -d --name kind-registry --restart=always -p 127.0.0.1:5001:5000 --network bridge registry:2"
        );
    }

    #[test(tokio::test)]
    async fn ensure_running_starts_stopped_registry() {
        let runner = Arc::new(MockRunner::new(|invocation| {
            if invocation.args[0] == "inspect" {
                MockRunner::ok("false")
            } else {
                MockRunner::ok("")
            }
        }));
        let runtime = ContainerRuntime::new(RuntimeKind::Docker, runner.clone());

        registry().ensure_running(&runtime).await.unwrap();

        assert_eq!(runner.command_lines()[1], "docker start kind-registry");
    }

    #[test(tokio::test)]
    async fn configure_mirror_writes_every_node_and_connects_once() {
        let runner = Arc::new(MockRunner::new(|invocation| {
            if invocation.args[0] == "inspect" {
                MockRunner::ok("null")
            } else {
                MockRunner::ok("")
            }
        }));
        let runtime = ContainerRuntime::new(RuntimeKind::Docker, runner.clone());
        let nodes = vec!["gpu-sim-worker".to_string(), "gpu-sim-worker2".to_string()];

        registry().configure_mirror(&runtime, &nodes).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0].args[..2], ["exec".to_string(), "gpu-sim-worker".to_string()]);
        assert!(calls[0].args[4].contains("/etc/containerd/certs.d/localhost:5001/hosts.toml"));
        assert!(calls[0].args[4].contains("http://kind-registry:5000"));
        assert_eq!(calls[1].args[1], "gpu-sim-worker2");
        assert_eq!(
            calls[3].to_string(),
            "docker network connect kind kind-registry"
        );
    }

    #[test(tokio::test)]
    async fn teardown_ignores_absent_registry() {
        let runner = Arc::new(MockRunner::new(|_| MockRunner::failed(1, "no such container")));
        let runtime = ContainerRuntime::new(RuntimeKind::Docker, runner.clone());

        registry().teardown(&runtime).await.unwrap();

        assert_eq!(runner.calls().len(), 1);
    }

    #[test(tokio::test)]
    async fn teardown_fails_when_daemon_is_unreachable() {
        let runner = Arc::new(MockRunner::new(|_| {
            MockRunner::failed(1, "Cannot connect to the Docker daemon at unix:///var/run/docker.sock")
        }));
        let runtime = ContainerRuntime::new(RuntimeKind::Docker, runner.clone());

        let err = registry().teardown(&runtime).await.unwrap_err();

        assert!(matches!(
            err.current_context(),
            RuntimeError::CommandFailed { .. }
        ));
        assert_eq!(runner.calls().len(), 1);
    }

    #[test(tokio::test)]
    async fn teardown_stops_then_removes() {
        let runner = Arc::new(MockRunner::new(|invocation| {
            if invocation.args[0] == "inspect" {
                MockRunner::ok("true")
            } else {
                MockRunner::ok("")
            }
        }));
        let runtime = ContainerRuntime::new(RuntimeKind::Docker, runner.clone());

        registry().teardown(&runtime).await.unwrap();

        assert_eq!(
            runner.command_lines()[1..],
            ["docker stop kind-registry", "docker rm kind-registry"]
        );
    }

    #[test(tokio::test)]
    async fn mirror_image_pulls_tags_pushes() {
        let runner = Arc::new(MockRunner::succeeding());
        let runtime = ContainerRuntime::new(RuntimeKind::Docker, runner.clone());

        let local = registry()
            .mirror_image(&runtime, "nvcr.io/nvidia/k8s-device-plugin:v0.17.0")
            .await
            .unwrap();

        assert_eq!(local, "localhost:5001/nvidia/k8s-device-plugin:v0.17.0");
        assert_eq!(
            runner.command_lines(),
            vec![
                "docker pull nvcr.io/nvidia/k8s-device-plugin:v0.17.0",
                "docker tag nvcr.io/nvidia/k8s-device-plugin:v0.17.0 localhost:5001/nvidia/k8s-device-plugin:v0.17.0",
                "docker push localhost:5001/nvidia/k8s-device-plugin:v0.17.0",
            ]
        );
    }

    #[test]
    fn hosting_config_map_points_at_host_port() {
        let cm = registry().hosting_config_map();
        assert_eq!(cm.metadata.namespace.as_deref(), Some("kube-public"));
        let data = cm.data.unwrap();
        assert!(data["localRegistryHosting.v1"].contains("host: \"localhost:5001\""));
    }
}
