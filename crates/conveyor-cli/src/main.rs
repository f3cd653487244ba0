mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "conveyor",
    version,
    about = "Runs one data-workflow job per process"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one job from a base64-encoded spec
    Run(RunArgs),
    /// Build a function archive
    Package(PackageArgs),
    /// List the contents of a function archive
    Inspect {
        /// Path to the archive
        archive: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Base64-encoded JSON job spec
    #[arg(long, env = "CONVEYOR_SPEC", hide_env_values = true)]
    spec: String,
    /// Runtime configuration YAML file
    #[arg(long, env = "CONVEYOR_CONFIG")]
    config: Option<PathBuf>,
    /// Wall-clock limit for a function invocation, in seconds
    #[arg(long, env = "CONVEYOR_FUNCTION_TIMEOUT_SECS")]
    function_timeout_secs: Option<u64>,
    /// Extra environment variable a function may inherit (repeatable)
    #[arg(long = "allow-env", value_name = "NAME")]
    allow_env: Vec<String>,
    /// Parent directory for function work directories
    #[arg(long, env = "CONVEYOR_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,
}

#[derive(Args)]
struct PackageArgs {
    /// Function name
    #[arg(long)]
    name: String,
    /// Directory holding the entry module and dependencies
    #[arg(long, default_value = ".")]
    source_dir: PathBuf,
    /// Entry module file, relative to the source directory
    #[arg(long)]
    entry: String,
    /// Callable inside the entry module
    #[arg(long)]
    method: String,
    /// Class owning the callable, if any
    #[arg(long)]
    class_name: Option<String>,
    /// Runtime version recorded in the archive
    #[arg(long)]
    runtime_version: String,
    /// Extra file or directory to carry, relative to the source directory (repeatable)
    #[arg(long = "dep", value_name = "PATH")]
    dependencies: Vec<String>,
    /// Where to write the archive
    #[arg(short, long)]
    output: PathBuf,
    /// Command launched in the unpacked archive (after `--`)
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run(args) => Ok(ExitCode::from(commands::run::execute(args).await?)),
        Commands::Package(args) => {
            commands::package::execute(args)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Inspect { archive } => {
            commands::inspect::execute(&archive)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
