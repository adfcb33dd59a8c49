//! Stencil CLI - render and reconcile template-driven Kubernetes modules

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use stencil_core::StencilConfig;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod error;
mod exit_codes;

use error::{CliError, Result};

#[derive(Parser)]
#[command(name = "stencil")]
#[command(author = "Stencil Contributors")]
#[command(version)]
#[command(about = "Render and reconcile template-driven Kubernetes modules", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Configuration file (default: <config_dir>/stencil/config.yaml)
    #[arg(long, global = true, env = "STENCIL_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve, load and print a module's rendered manifest
    Template {
        /// Module file
        module: PathBuf,

        /// Kubernetes version exposed as Capabilities.KubeVersion
        #[arg(long, default_value = "v1.31.0")]
        kube_version: String,
    },

    /// Print the initial values of a module's template
    Values {
        /// Module file
        module: PathBuf,

        /// Print JSON instead of YAML
        #[arg(long)]
        json: bool,
    },

    /// Reconcile a module against the current kube context
    Apply {
        /// Module file
        module: PathBuf,

        /// Patch the outcome onto the Module custom resource
        #[arg(long)]
        record_status: bool,
    },

    /// Show health and managed resources of a module
    Status {
        /// Module name
        name: String,

        /// Namespace of the Module record
        #[arg(short, long, default_value = "default")]
        namespace: String,
    },

    /// Delete managed resources absent from the current render
    Prune {
        /// Module file
        module: PathBuf,

        /// List what would be deleted without deleting it
        #[arg(long)]
        dry_run: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&std::path::Path>) -> Result<StencilConfig> {
    let config = match path {
        Some(path) => StencilConfig::load_from(path).map_err(|e| {
            CliError::input_with_help(
                format!("cannot load config {}: {}", path.display(), e),
                "every field is optional; check field names and duration syntax",
            )
        })?,
        None => StencilConfig::load()?,
    };
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Template {
            module,
            kube_version,
        } => commands::template::run(&module, &kube_version, &config).await,

        Commands::Values { module, json } => commands::values::run(&module, json, &config).await,

        Commands::Apply {
            module,
            record_status,
        } => commands::apply::run(&module, record_status, &config).await,

        Commands::Status { name, namespace } => commands::status::run(&name, &namespace, &config).await,

        Commands::Prune { module, dry_run } => commands::prune::run(&module, dry_run, &config).await,
    }
}

#[tokio::main]
async fn main() {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}
