use std::path::Path;

use error_stack::ResultExt;
use tracing::info;

use crate::cluster::LocalRegistry;
use crate::error::ProvisionError;
use crate::error::ProvisionResult;
use crate::runtime::ContainerRuntime;

const DOWNLOAD_BASE_IMAGE: &str = "docker.io/library/python:3.12-slim";
/// Final stage; must ship `sh` and `cp` for the init container.
const MODEL_BASE_IMAGE: &str = "docker.io/library/busybox:stable";
/// Where model files live inside the model image.
pub(crate) const MODEL_ROOT: &str = "/models";

/// Two-stage Containerfile: download the model with `huggingface-cli`, then
/// copy only the weights into a minimal image.
pub(crate) fn containerfile(model_id: &str, workload: &str) -> String {
    format!(
        "FROM {DOWNLOAD_BASE_IMAGE} AS download\n\
         RUN pip install --no-cache-dir \"huggingface_hub[cli]\"\n\
         RUN huggingface-cli download '{model_id}' --local-dir {MODEL_ROOT}/{workload}\n\
         \n\
         FROM {MODEL_BASE_IMAGE}\n\
         COPY --from=download {MODEL_ROOT} {MODEL_ROOT}\n"
    )
}

/// Image reference of a packaged model in the local registry.
pub(crate) fn model_image_reference(registry: &LocalRegistry, workload: &str) -> String {
    format!("{}/models/{workload}:latest", registry.host())
}

/// Builds the model image from a generated context under `build_dir`, pushes
/// it into the local registry and optionally saves it to `archive`.
#[tracing::instrument(skip(runtime, registry, build_dir))]
pub(crate) async fn package_model(
    runtime: &ContainerRuntime,
    registry: &LocalRegistry,
    model_id: &str,
    workload: &str,
    build_dir: &Path,
    archive: Option<&Path>,
) -> ProvisionResult<String> {
    let containerfile_path = build_dir.join("Containerfile");
    write_file(&containerfile_path, &containerfile(model_id, workload))?;

    let reference = model_image_reference(registry, workload);
    runtime
        .build(build_dir, &containerfile_path, &reference)
        .await
        .change_context(ProvisionError::Command {
            step: "model image build",
        })?;
    runtime
        .push(&reference)
        .await
        .change_context(ProvisionError::Command {
            step: "model image push",
        })?;

    if let Some(archive) = archive {
        runtime
            .save(&reference, archive)
            .await
            .change_context(ProvisionError::Command {
                step: "model image save",
            })?;
    }

    info!(image = %reference, "model packaged");
    Ok(reference)
}

/// Writes `contents` to `path`, creating parent directories.
pub(crate) fn write_file(path: &Path, contents: &str) -> ProvisionResult<()> {
    let io_error = || ProvisionError::Io {
        path: path.display().to_string(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).change_context_lazy(io_error)?;
    }
    std::fs::write(path, contents).change_context_lazy(io_error)
}
