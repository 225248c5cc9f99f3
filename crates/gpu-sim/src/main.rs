mod cluster;
mod config;
mod error;
mod k8s;
mod model;
mod provision;
mod runtime;
mod simulation;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use utils::version;

use crate::config::ClusterArgs;
use crate::config::ClusterConfig;
use crate::config::Cli;
use crate::config::Commands;
use crate::config::CreateArgs;
use crate::config::DeleteArgs;
use crate::config::ModelCommands;
use crate::config::RemoveModelArgs;
use crate::config::ServeModelArgs;
use crate::error::ProvisionResult;
use crate::model::ModelServer;
use crate::model::ServeRequest;
use crate::provision::connect;
use crate::provision::Provisioner;
use crate::runtime::on_path;
use crate::runtime::SystemRunner;
use crate::simulation::ReadinessSettings;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_global_hooks();

    let cli = Cli::parse();

    let _guard = match utils::logging::init_with_file(cli.log_file.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize log file: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("gpu-sim {}", &**version::VERSION);

    // Ctrl-C cancels the readiness waits; every other step runs to completion
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling");
                cancel.cancel();
            }
        }
    });

    let result = match cli.command {
        Commands::Create(args) => run_create(args, cancel).await,
        Commands::Delete(args) => run_delete(args).await,
        Commands::Model {
            command: ModelCommands::Serve(args),
        } => run_model_serve(args, cancel).await,
        Commands::Model {
            command: ModelCommands::Remove(args),
        } => run_model_remove(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("Error: {report:?}");
            ExitCode::from(report.current_context().exit_code())
        }
    }
}

fn resolve(args: &ClusterArgs, required_tools: &[&str]) -> ProvisionResult<ClusterConfig> {
    ClusterConfig::resolve(args, required_tools, on_path)
}

async fn run_create(args: CreateArgs, cancel: CancellationToken) -> ProvisionResult<()> {
    let config = resolve(&args.cluster, &["kind"])?;
    tracing::info!(
        vendor = %args.vendor,
        runtime = config.runtime.binary(),
        cluster = %config.cluster_name,
        "creating simulated GPU cluster"
    );

    let settings = ReadinessSettings {
        timeout: Duration::from_secs(args.readiness_timeout),
        grace_delay: Duration::from_secs(args.grace_delay),
        poll_interval: Duration::from_secs(args.poll_interval),
    };

    Provisioner::new(config, Arc::new(SystemRunner))
        .create(args.vendor, args.plugin_image.as_deref(), settings, cancel)
        .await?;
    Ok(())
}

async fn run_delete(args: DeleteArgs) -> ProvisionResult<()> {
    let config = resolve(&args.cluster, &["kind"])?;
    Provisioner::new(config, Arc::new(SystemRunner))
        .delete()
        .await
}

async fn run_model_serve(args: ServeModelArgs, cancel: CancellationToken) -> ProvisionResult<()> {
    let config = resolve(&args.cluster, &[])?;
    let api = connect(&config).await?;

    let request = ServeRequest {
        model_id: &args.model,
        vendor: args.vendor,
        serving_image: &args.serving_image,
        port: args.port,
        namespace: &args.namespace,
        archive: args.archive.as_deref(),
    };
    let settings = ReadinessSettings {
        timeout: Duration::from_secs(args.readiness_timeout),
        ..Default::default()
    };

    ModelServer::new(config, Arc::new(SystemRunner))
        .serve(&api, &request, settings, cancel)
        .await?;
    Ok(())
}

async fn run_model_remove(args: RemoveModelArgs) -> ProvisionResult<()> {
    let config = resolve(&args.cluster, &[])?;
    let api = connect(&config).await?;

    ModelServer::new(config, Arc::new(SystemRunner))
        .remove(&api, &args.model, &args.namespace)
        .await?;
    Ok(())
}
