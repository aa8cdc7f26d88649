mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lambdalite-cli")]
#[command(about = "LambdaLite CLI - Build execution images, invoke functions, inspect metrics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write default build recipes and engine config
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: String,
    },

    /// Build missing execution images
    BuildImages {
        /// Rebuild even if the image already exists
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Run a function once
    Invoke {
        /// Function name used for metrics
        #[arg(short, long)]
        name: String,

        /// Language (python, node)
        #[arg(short, long)]
        language: String,

        /// Source file to run
        #[arg(short, long)]
        file: PathBuf,

        /// Timeout in seconds
        #[arg(short, long, default_value = "5")]
        timeout: u64,

        /// Isolation runtime (standard/runc, sandboxed/runsc)
        #[arg(short, long, default_value = "standard")]
        runtime: String,
    },

    /// Run a function under both runtimes
    Compare {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        language: String,

        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long, default_value = "5")]
        timeout: u64,
    },

    /// Show recorded metrics
    Metrics {
        /// Latest record of one function instead of the aggregate table
        #[arg(short, long)]
        function: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path } => {
            commands::init_project(&path).await?;
        }
        Commands::BuildImages { force } => {
            commands::build_images(force).await?;
        }
        Commands::Invoke {
            name,
            language,
            file,
            timeout,
            runtime,
        } => {
            commands::invoke(&name, &language, &file, timeout, &runtime).await?;
        }
        Commands::Compare {
            name,
            language,
            file,
            timeout,
        } => {
            commands::compare(&name, &language, &file, timeout).await?;
        }
        Commands::Metrics { function } => {
            commands::show_metrics(function.as_deref()).await?;
        }
    }

    Ok(())
}
