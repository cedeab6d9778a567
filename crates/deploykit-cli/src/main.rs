//! Workshop deployment CLI.

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "deploykit")]
#[command(about = "Deploy and tear down the workshop environment", long_about = None)]
struct Cli {
    /// AWS region; falls back to AWS_REGION from the environment file
    #[arg(long, env = "AWS_REGION", global = true)]
    region: Option<String>,

    /// Stack name prefix for every resource this tool owns
    #[arg(long, default_value = "", global = true)]
    stack_prefix: String,

    /// Path to the environment file
    #[arg(long, default_value = ".env", global = true)]
    env_file: String,

    /// Operate on every account in the configured organizational unit
    #[arg(long, global = true)]
    multi_account: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the workshop stacks
    Deploy,
    /// Delete everything the naming convention owns
    Destroy {
        /// Skip the confirmation prompt
        #[arg(long)]
        confirm: bool,
        /// Keep container images for a faster re-deploy
        #[arg(long)]
        preserve_images: bool,
        /// Force-delete resources that support it (skip recovery windows
        /// and in-use checks)
        #[arg(long)]
        force: bool,
    },
    /// Show the current state of each stack
    Status,
    /// Re-probe the deployment without changing anything
    Verify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = commands::load_settings(
        &cli.env_file,
        cli.region.as_deref(),
        &cli.stack_prefix,
        cli.multi_account,
    )?;

    let ok = match cli.command {
        Commands::Deploy => commands::deploy(settings).await?,
        Commands::Destroy { confirm, preserve_images, force } => {
            commands::destroy(settings, confirm, preserve_images, force).await?
        }
        Commands::Status => commands::status(settings).await?,
        Commands::Verify => commands::verify(settings).await?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
