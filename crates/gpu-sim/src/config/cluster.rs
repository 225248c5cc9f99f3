use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;

use crate::cluster::kube_context;
use crate::cluster::LocalRegistry;
use crate::config::cli::ClusterArgs;
use crate::error::ProvisionError;
use crate::runtime::RuntimeKind;

/// Per-run settings every component receives explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ClusterConfig {
    pub(crate) runtime: RuntimeKind,
    pub(crate) cluster_name: String,
    pub(crate) registry: LocalRegistry,
    pub(crate) kubeconfig: Option<PathBuf>,
    pub(crate) work_dir: PathBuf,
}

impl ClusterConfig {
    /// Builds the configuration, resolving the container runtime and checking
    /// that every tool in `required_tools` is installed.
    pub(crate) fn resolve(
        args: &ClusterArgs,
        required_tools: &[&str],
        is_installed: impl Fn(&str) -> bool,
    ) -> Result<Self, Report<ProvisionError>> {
        let runtime = RuntimeKind::detect(args.runtime, &is_installed).change_context(
            ProvisionError::MissingPrerequisite {
                message: "container runtime".to_string(),
            },
        )?;

        if let Some(tool) = required_tools.iter().find(|tool| !is_installed(tool)) {
            return Err(Report::new(ProvisionError::MissingPrerequisite {
                message: format!("`{tool}` not found on PATH"),
            }));
        }

        Ok(Self {
            runtime,
            cluster_name: args.cluster_name.clone(),
            registry: LocalRegistry::new(args.registry_name.clone(), args.registry_port),
            kubeconfig: args.kubeconfig.clone(),
            work_dir: args.work_dir.clone(),
        })
    }

    /// Scratch kind topology file for this cluster.
    pub(crate) fn topology_path(&self) -> PathBuf {
        self.work_dir
            .join(format!("{}-config.yaml", self.cluster_name))
    }

    pub(crate) fn kube_context(&self) -> String {
        kube_context(&self.cluster_name)
    }

    /// Scratch directory for a served model.
    pub(crate) fn model_dir(&self, workload: &str) -> PathBuf {
        self.work_dir.join("models").join(workload)
    }
}
