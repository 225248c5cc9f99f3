use std::path::PathBuf;

use api_types::Vendor;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::runtime::RuntimeKind;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub(crate) struct Cli {
    #[arg(
        long,
        global = true,
        env = "GPU_SIM_LOG_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Also write logs to this file, rotated daily"
    )]
    pub(crate) log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Create the cluster, fake GPU capacity and deploy the device plugin
    Create(CreateArgs),
    /// Delete the cluster and the local registry
    Delete(DeleteArgs),
    /// Package and serve Hugging Face models on the simulated GPUs
    Model {
        #[command(subcommand)]
        command: ModelCommands,
    },
}

/// Options shared by every command that touches the cluster.
#[derive(Args, Clone, Debug)]
pub(crate) struct ClusterArgs {
    #[arg(
        long,
        env = "GPU_SIM_CLUSTER_NAME",
        default_value = "gpu-sim",
        help = "Name of the kind cluster"
    )]
    pub(crate) cluster_name: String,

    #[arg(
        long,
        env = "GPU_SIM_REGISTRY_NAME",
        default_value = "kind-registry",
        help = "Name of the local registry container"
    )]
    pub(crate) registry_name: String,

    #[arg(
        long,
        env = "GPU_SIM_REGISTRY_PORT",
        default_value_t = 5001,
        help = "Host port the local registry is published on"
    )]
    pub(crate) registry_port: u16,

    #[arg(
        long,
        value_enum,
        env = "GPU_SIM_RUNTIME",
        help = "Container runtime to use, detected from PATH (docker, then podman) when omitted"
    )]
    pub(crate) runtime: Option<RuntimeKind>,

    #[arg(
        long,
        env = "GPU_SIM_KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to the kubeconfig file, default lookup when omitted"
    )]
    pub(crate) kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "GPU_SIM_WORK_DIR",
        default_value = ".gpu-sim",
        value_hint = clap::ValueHint::DirPath,
        help = "Directory for generated scratch files"
    )]
    pub(crate) work_dir: PathBuf,
}

#[derive(Args, Clone, Debug)]
pub(crate) struct CreateArgs {
    #[arg(
        value_name = "rocm|nvidia",
        default_value = "rocm",
        help = "Vendor whose GPUs are simulated"
    )]
    pub(crate) vendor: Vendor,

    #[command(flatten)]
    pub(crate) cluster: ClusterArgs,

    #[arg(
        long,
        default_value_t = 60,
        help = "Seconds to wait for the device plugin pods to become Ready"
    )]
    pub(crate) readiness_timeout: u64,

    #[arg(
        long,
        default_value_t = 5,
        help = "Seconds to wait after submitting the device plugin before polling"
    )]
    pub(crate) grace_delay: u64,

    #[arg(long, default_value_t = 2, help = "Seconds between readiness polls")]
    pub(crate) poll_interval: u64,

    #[arg(
        long,
        env = "GPU_SIM_PLUGIN_IMAGE",
        help = "Device plugin image to mirror instead of the vendor default"
    )]
    pub(crate) plugin_image: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub(crate) struct DeleteArgs {
    #[command(flatten)]
    pub(crate) cluster: ClusterArgs,
}

#[derive(Subcommand, Clone, Debug)]
pub(crate) enum ModelCommands {
    /// Build an OCI image holding a model and deploy it as a served workload
    Serve(ServeModelArgs),
    /// Remove a served model workload
    Remove(RemoveModelArgs),
}

#[derive(Args, Clone, Debug)]
pub(crate) struct ServeModelArgs {
    #[arg(long, help = "Hugging Face model id, e.g. Qwen/Qwen2.5-0.5B-Instruct")]
    pub(crate) model: String,

    #[arg(
        long,
        value_name = "rocm|nvidia",
        default_value = "rocm",
        help = "Vendor resource the workload requests"
    )]
    pub(crate) vendor: Vendor,

    #[arg(
        long,
        env = "GPU_SIM_SERVING_IMAGE",
        default_value = "docker.io/vllm/vllm-openai:latest",
        help = "Image running the model server"
    )]
    pub(crate) serving_image: String,

    #[arg(long, default_value_t = 8000, help = "Port the model server listens on")]
    pub(crate) port: u16,

    #[arg(long, default_value = "default", help = "Namespace of the workload")]
    pub(crate) namespace: String,

    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        help = "Also save the model image to this tar archive"
    )]
    pub(crate) archive: Option<PathBuf>,

    #[arg(
        long,
        default_value_t = 600,
        help = "Seconds to wait for the workload pod to become Ready"
    )]
    pub(crate) readiness_timeout: u64,

    #[command(flatten)]
    pub(crate) cluster: ClusterArgs,
}

#[derive(Args, Clone, Debug)]
pub(crate) struct RemoveModelArgs {
    #[arg(long, help = "Hugging Face model id the workload was served from")]
    pub(crate) model: String,

    #[arg(long, default_value = "default", help = "Namespace of the workload")]
    pub(crate) namespace: String,

    #[command(flatten)]
    pub(crate) cluster: ClusterArgs,
}
