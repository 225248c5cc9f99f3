use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;

use crate::k8s::types::KubernetesError;

/// Builds a client for the given kubeconfig file and context.
///
/// Without a path the default kubeconfig lookup applies (`KUBECONFIG`, then
/// `~/.kube/config`); without a context the file's current context is used.
pub(crate) async fn init_kube_client(
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
) -> Result<Client, Report<KubernetesError>> {
    let options = KubeConfigOptions {
        context,
        ..Default::default()
    };

    let kubeconfig = match kubeconfig {
        Some(kubeconfig_path) => Kubeconfig::read_from(&kubeconfig_path).change_context(
            KubernetesError::ConnectionFailed {
                message: format!(
                    "Failed to read kubeconfig file: {}",
                    kubeconfig_path.display()
                ),
            },
        )?,
        None => Kubeconfig::read().change_context(KubernetesError::ConnectionFailed {
            message: "Failed to read default kubeconfig".to_string(),
        })?,
    };

    let config = Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .change_context(KubernetesError::ConnectionFailed {
            message: format!(
                "Failed to create config for context {}",
                options.context.as_deref().unwrap_or("<current>")
            ),
        })?;

    Client::try_from(config).change_context(KubernetesError::ConnectionFailed {
        message: "Failed to create Kubernetes client".to_string(),
    })
}
