//! The `create` and `delete` pipelines.
//!
//! Steps run strictly in order and the first failure aborts the run. Nothing
//! is rolled back: a failed `create` leaves whatever was provisioned so far
//! for `delete` to clean up.

use std::sync::Arc;

use api_types::ReadinessOutcome;
use api_types::Vendor;
use api_types::FAKE_GPU_COUNT;
use api_types::PLUGIN_NAMESPACE;
use error_stack::Report;
use error_stack::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cluster::KindCli;
use crate::cluster::KindCluster;
use crate::cluster::WORKER_COUNT;
use crate::config::ClusterConfig;
use crate::error::ProvisionError;
use crate::error::ProvisionResult;
use crate::k8s::init_kube_client;
use crate::k8s::ClusterApi;
use crate::k8s::KubeClusterApi;
use crate::runtime::CommandRunner;
use crate::runtime::ContainerRuntime;
use crate::simulation::CapacityFaker;
use crate::simulation::ReadinessSettings;
use crate::simulation::ReadinessWaiter;
use crate::simulation::WaitError;

/// Converts a failed wait, keeping cancellation distinguishable.
pub(crate) fn wait_failure(report: Report<WaitError>, step: &'static str) -> Report<ProvisionError> {
    if matches!(report.current_context(), WaitError::Cancelled) {
        report.change_context(ProvisionError::Cancelled)
    } else {
        report.change_context(ProvisionError::Kubernetes { step })
    }
}

/// API client for the cluster's kind context.
pub(crate) async fn connect(config: &ClusterConfig) -> ProvisionResult<KubeClusterApi> {
    let client = init_kube_client(config.kubeconfig.clone(), Some(config.kube_context()))
        .await
        .change_context(ProvisionError::Kubernetes {
            step: "client setup",
        })?;
    Ok(KubeClusterApi::new(client))
}

pub(crate) struct Provisioner {
    config: ClusterConfig,
    runtime: ContainerRuntime,
    kind: KindCli,
}

impl Provisioner {
    pub(crate) fn new(config: ClusterConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runtime: ContainerRuntime::new(config.runtime, runner.clone()),
            kind: KindCli::new(config.runtime, runner),
            config,
        }
    }

    /// Full `create`: cluster bootstrap, capacity faking and the device plugin
    /// readiness handshake.
    pub(crate) async fn create(
        &self,
        vendor: Vendor,
        plugin_image: Option<&str>,
        settings: ReadinessSettings,
        cancel: CancellationToken,
    ) -> ProvisionResult<ReadinessOutcome> {
        self.bootstrap().await?;

        let api = connect(&self.config).await?;
        self.simulate(&api, vendor, plugin_image, settings, cancel)
            .await
    }

    /// Starts the registry, creates the kind cluster unless it exists, and
    /// points every node at the registry mirror.
    #[tracing::instrument(skip(self), fields(cluster = %self.config.cluster_name))]
    pub(crate) async fn bootstrap(&self) -> ProvisionResult<()> {
        let registry = &self.config.registry;
        registry
            .ensure_running(&self.runtime)
            .await
            .change_context(ProvisionError::Command {
                step: "registry startup",
            })?;

        let name = &self.config.cluster_name;
        let exists = self
            .kind
            .exists(name)
            .await
            .change_context(ProvisionError::Command {
                step: "cluster lookup",
            })?;

        if exists {
            info!("cluster already exists, reusing it");
        } else {
            let path = self.config.topology_path();
            KindCluster::with_workers(WORKER_COUNT)
                .write_to(&path)
                .change_context(ProvisionError::Io {
                    path: path.display().to_string(),
                })?;
            info!(config = %path.display(), "creating cluster");
            self.kind
                .create(name, &path)
                .await
                .change_context(ProvisionError::Command {
                    step: "cluster create",
                })?;
        }

        let nodes = self
            .kind
            .nodes(name)
            .await
            .change_context(ProvisionError::Command {
                step: "node enumeration",
            })?;
        registry
            .configure_mirror(&self.runtime, &nodes)
            .await
            .change_context(ProvisionError::Command {
                step: "registry mirror setup",
            })?;
        Ok(())
    }

    /// Fakes GPU capacity on the workers, mirrors the vendor device plugin
    /// into the local registry and waits for it to become Ready.
    #[tracing::instrument(skip(self, api, settings, cancel))]
    pub(crate) async fn simulate(
        &self,
        api: &dyn ClusterApi,
        vendor: Vendor,
        plugin_image: Option<&str>,
        settings: ReadinessSettings,
        cancel: CancellationToken,
    ) -> ProvisionResult<ReadinessOutcome> {
        let profile = vendor.profile();
        let registry = &self.config.registry;

        api.apply_config_map(&registry.hosting_config_map())
            .await
            .change_context(ProvisionError::Kubernetes {
                step: "registry hosting config",
            })?;

        let nodes = api
            .worker_nodes()
            .await
            .change_context(ProvisionError::Kubernetes {
                step: "node enumeration",
            })?;
        if nodes.is_empty() {
            return Err(Report::new(ProvisionError::NoWorkerNodes {
                cluster: self.config.cluster_name.clone(),
            }));
        }

        let faked = CapacityFaker::new(api, profile, FAKE_GPU_COUNT)
            .fake_nodes(&nodes)
            .await
            .change_context(ProvisionError::Kubernetes {
                step: "capacity faking",
            })?;

        let image = registry
            .mirror_image(&self.runtime, plugin_image.unwrap_or(profile.plugin_image))
            .await
            .change_context(ProvisionError::Command {
                step: "device plugin image mirror",
            })?;

        let outcome = ReadinessWaiter::new(api, settings, cancel)
            .deploy_and_wait(profile, &image, faked)
            .await
            .map_err(|report| wait_failure(report, "device plugin rollout"))?;

        match outcome {
            ReadinessOutcome::Ready { .. } => {
                info!(
                    nodes = nodes.len(),
                    "cluster ready: {} x {} per worker",
                    FAKE_GPU_COUNT,
                    profile.resource_name
                );
                Ok(outcome)
            }
            ReadinessOutcome::TimedOut { elapsed } => {
                Err(Report::new(ProvisionError::ReadinessTimeout {
                    what: format!("DaemonSet {PLUGIN_NAMESPACE}/{}", profile.daemonset_name),
                    timeout: settings.timeout,
                    elapsed,
                }))
            }
        }
    }

    /// Deletes the cluster and the registry container, then the scratch
    /// topology file. Missing pieces are skipped.
    #[tracing::instrument(skip(self), fields(cluster = %self.config.cluster_name))]
    pub(crate) async fn delete(&self) -> ProvisionResult<()> {
        let name = &self.config.cluster_name;
        let exists = self
            .kind
            .exists(name)
            .await
            .change_context(ProvisionError::Command {
                step: "cluster lookup",
            })?;

        if exists {
            self.kind
                .delete(name)
                .await
                .change_context(ProvisionError::Command {
                    step: "cluster delete",
                })?;
            info!("cluster deleted");
        } else {
            info!("cluster not found, nothing to delete");
        }

        self.config
            .registry
            .teardown(&self.runtime)
            .await
            .change_context(ProvisionError::Command {
                step: "registry teardown",
            })?;

        let path = self.config.topology_path();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Report::new(e).change_context(ProvisionError::Io {
                path: path.display().to_string(),
            })),
        }
    }
}
