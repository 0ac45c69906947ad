//! coverkube CLI
//!
//! Instruments a Go workload running in Kubernetes to write coverage data,
//! collects that data to a local directory, and removes every trace again.

mod commands;
mod config;
mod output;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use coverkube_lib::{KubeExecExtractor, KubeGateway, Orchestrator, Target};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::output::{print_error, print_warning, TerminalProgress};

/// Collect Go coverage data from workloads running in Kubernetes
#[derive(Parser)]
#[command(name = "coverkube")]
#[command(author, version, about = "Collect Go coverage data from workloads running in Kubernetes", long_about = None)]
pub struct Cli {
    /// Path to kubeconfig file (defaults to $KUBECONFIG, then ~/.kube/config)
    #[arg(long, global = true)]
    pub kubeconfig: Option<String>,

    /// Namespace of the target workload
    #[arg(long, short, env = "NAMESPACE", default_value = "default", global = true)]
    pub namespace: String,

    /// Target Deployment
    #[arg(long, short, env = "DEPLOYMENT", global = true, conflicts_with = "pod")]
    pub deployment: Option<String>,

    /// Target Pod
    #[arg(long, short, env = "POD", global = true)]
    pub pod: Option<String>,

    /// Timeout in seconds for every wait (overrides configured timeouts)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Log format written to stderr
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision storage and instrument the target for coverage collection
    Init,

    /// Restart the target and copy its coverage data to a local directory
    Collect {
        /// Directory to write coverage files to (created when missing)
        output_dir: String,
    },

    /// Remove the instrumentation, the collector pod and the storage
    Clear,

    /// Print the coverkube version
    Version,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Cli {
    /// The single target selected by `--deployment` or `--pod`
    fn target(&self) -> Result<Target> {
        match (&self.deployment, &self.pod) {
            (Some(deployment), None) => Ok(Target::deployment(&self.namespace, deployment)),
            (None, Some(pod)) => Ok(Target::pod(&self.namespace, pod)),
            (Some(_), Some(_)) => bail!("--deployment and --pod cannot be used together"),
            (None, None) => bail!("a target is required: pass --deployment <NAME> or --pod <NAME>"),
        }
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

/// Cancel the returned token on the first Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            print_warning("Interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}

async fn orchestrator(cli: &Cli) -> Result<Orchestrator> {
    let mut settings = config::load_settings()?;
    if let Some(secs) = cli.timeout {
        settings = settings.with_timeout(Duration::from_secs(secs));
    }

    let client = config::kube_client(cli.kubeconfig.as_deref()).await?;

    let orchestrator = Orchestrator::builder()
        .gateway(Arc::new(KubeGateway::new(client.clone())))
        .extractor(Arc::new(KubeExecExtractor::new(client)))
        .progress(Arc::new(TerminalProgress))
        .settings(settings)
        .cancellation_token(cancel_on_interrupt())
        .build()?;

    orchestrator
        .check_connection()
        .await
        .context("unable to reach the Kubernetes API server")?;

    Ok(orchestrator)
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Version => {
            commands::print_version();
            Ok(())
        }
        Commands::Init => {
            let target = cli.target()?;
            let orchestrator = orchestrator(&cli).await?;
            commands::init::run(&orchestrator, &target).await
        }
        Commands::Collect { output_dir } => {
            let target = cli.target()?;
            let destination = commands::collect::validate_output_dir(output_dir)?;
            let orchestrator = orchestrator(&cli).await?;
            commands::collect::run(&orchestrator, &target, &destination).await
        }
        Commands::Clear => {
            let target = cli.target()?;
            let orchestrator = orchestrator(&cli).await?;
            commands::clear::run(&orchestrator, &target).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}
