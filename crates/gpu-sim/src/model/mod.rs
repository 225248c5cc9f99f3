//! Packaging Hugging Face models as OCI images and serving them on the
//! simulated GPUs.

pub(crate) mod image;
pub(crate) mod manifest;

use std::path::Path;
use std::sync::Arc;

use api_types::ReadinessOutcome;
use api_types::Vendor;
use error_stack::Report;
use error_stack::ResultExt;
use sha2::Digest;
use sha2::Sha256;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ClusterConfig;
use crate::error::ProvisionError;
use crate::error::ProvisionResult;
use crate::k8s::ClusterApi;
use crate::model::image::package_model;
use crate::model::image::write_file;
use crate::model::manifest::ModelWorkload;
use crate::provision::wait_failure;
use crate::runtime::CommandRunner;
use crate::runtime::ContainerRuntime;
use crate::simulation::ReadinessSettings;
use crate::simulation::ReadinessWaiter;

/// Kubernetes object names are DNS-1035 labels.
const MAX_NAME_LEN: usize = 63;

/// Hex digits of the model id digest appended to every workload name.
const SUFFIX_LEN: usize = 8;

fn is_model_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-')
}

/// Derives a DNS-1035 safe workload name from a model id.
///
/// `Qwen/Qwen2.5-0.5B-Instruct` becomes `qwen-qwen2-5-0-5b-instruct-<hash>`.
/// The hash is taken over the raw id, so ids that slug to the same text
/// (`acme/tiny` and `acme-tiny`) still get distinct names.
pub(crate) fn workload_name(model_id: &str) -> ProvisionResult<String> {
    if let Some(bad) = model_id.chars().find(|&c| !is_model_id_char(c)) {
        return Err(Report::new(ProvisionError::InvalidArgument {
            message: format!("model id `{model_id}` contains `{bad}`; allowed are A-Z a-z 0-9 . _ / -"),
        }));
    }

    let mut slug = String::with_capacity(model_id.len());
    for c in model_id.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }

    if slug.starts_with(|c: char| c.is_ascii_digit()) {
        slug.insert_str(0, "m-");
    }
    slug.truncate(MAX_NAME_LEN - SUFFIX_LEN - 1);
    let slug = slug.trim_end_matches('-');

    if slug.is_empty() {
        return Err(Report::new(ProvisionError::InvalidArgument {
            message: format!("model id `{model_id}` contains no usable characters"),
        }));
    }

    let digest = format!("{:x}", Sha256::digest(model_id.as_bytes()));
    Ok(format!("{slug}-{}", &digest[..SUFFIX_LEN]))
}

/// What to serve and how.
#[derive(Debug, Clone)]
pub(crate) struct ServeRequest<'a> {
    pub(crate) model_id: &'a str,
    pub(crate) vendor: Vendor,
    pub(crate) serving_image: &'a str,
    pub(crate) port: u16,
    pub(crate) namespace: &'a str,
    pub(crate) archive: Option<&'a Path>,
}

pub(crate) struct ModelServer {
    config: ClusterConfig,
    runtime: ContainerRuntime,
}

impl ModelServer {
    pub(crate) fn new(config: ClusterConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runtime: ContainerRuntime::new(config.runtime, runner),
            config,
        }
    }

    /// Packages the model, applies its Deployment and Service and waits for
    /// the workload pod to become Ready.
    #[tracing::instrument(skip_all, fields(model = request.model_id))]
    pub(crate) async fn serve(
        &self,
        api: &dyn ClusterApi,
        request: &ServeRequest<'_>,
        settings: ReadinessSettings,
        cancel: CancellationToken,
    ) -> ProvisionResult<ReadinessOutcome> {
        let name = workload_name(request.model_id)?;
        let dir = self.config.model_dir(&name);

        let model_image = package_model(
            &self.runtime,
            &self.config.registry,
            request.model_id,
            &name,
            &dir,
            request.archive,
        )
        .await?;

        let workload = ModelWorkload {
            name,
            model_id: request.model_id.to_string(),
            namespace: request.namespace.to_string(),
            model_image,
            serving_image: request.serving_image.to_string(),
            port: request.port,
            profile: request.vendor.profile(),
        };

        let manifest_path = dir.join("manifest.yaml");
        let yaml = workload
            .to_yaml()
            .change_context(ProvisionError::Io {
                path: manifest_path.display().to_string(),
            })?;
        write_file(&manifest_path, &yaml)?;

        api.apply_deployment(&workload.deployment())
            .await
            .change_context(ProvisionError::Kubernetes {
                step: "model deployment",
            })?;
        api.apply_service(&workload.service())
            .await
            .change_context(ProvisionError::Kubernetes {
                step: "model service",
            })?;
        info!(workload = %workload.name, manifest = %manifest_path.display(), "model workload applied");

        let outcome = ReadinessWaiter::new(api, settings, cancel)
            .wait_for_selector(&workload.namespace, &workload.pod_selector())
            .await
            .map_err(|report| wait_failure(report, "model rollout"))?;

        match outcome {
            ReadinessOutcome::Ready { elapsed } => {
                info!(
                    ?elapsed,
                    "model {} served at {}.{}.svc:{}",
                    workload.model_id,
                    workload.name,
                    workload.namespace,
                    workload.port
                );
                Ok(outcome)
            }
            ReadinessOutcome::TimedOut { elapsed } => {
                Err(Report::new(ProvisionError::ReadinessTimeout {
                    what: format!("Deployment {}/{}", workload.namespace, workload.name),
                    timeout: settings.timeout,
                    elapsed,
                }))
            }
        }
    }

    /// Deletes the Deployment and Service of a served model. Returns whether
    /// anything was there.
    #[tracing::instrument(skip(self, api))]
    pub(crate) async fn remove(
        &self,
        api: &dyn ClusterApi,
        model_id: &str,
        namespace: &str,
    ) -> ProvisionResult<bool> {
        let name = workload_name(model_id)?;

        let deployment = api
            .delete_deployment(namespace, &name)
            .await
            .change_context(ProvisionError::Kubernetes {
                step: "model deployment removal",
            })?;
        let service = api
            .delete_service(namespace, &name)
            .await
            .change_context(ProvisionError::Kubernetes {
                step: "model service removal",
            })?;

        if deployment || service {
            info!(workload = %name, "model workload removed");
        } else {
            info!(workload = %name, "model workload not found");
        }
        Ok(deployment || service)
    }
}
