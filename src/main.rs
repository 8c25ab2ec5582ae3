//! `clipwright` CLI - produce short videos from job files

mod cmd;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use clipwright::RunConfig;

#[derive(Parser)]
#[command(name = "clipwright")]
#[command(about = "Compose narrated text cards and media clips into finished videos")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/clipwright/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Produce and publish items from job files
    Produce {
        /// Job files (JSON, one job or an array)
        #[arg(required = true)]
        jobs: Vec<PathBuf>,

        /// Produce only the job with this name
        #[arg(short, long)]
        item: Option<String>,

        /// Produce at most this many items
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Validate jobs without rendering anything
        #[arg(long)]
        dry_run: bool,

        /// Output directory for composed videos
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Extra publish destination (repeatable)
        #[arg(short, long)]
        dest: Vec<PathBuf>,
    },

    /// Resolve a job's timeline and print it as JSON
    Timeline {
        /// Job file
        job: PathBuf,

        /// Job name when the file holds several
        #[arg(short, long)]
        item: Option<String>,
    },

    /// Print the duration and streams of a media file
    Probe {
        /// Media file
        file: PathBuf,
    },

    /// Check that ffmpeg, ffprobe and credentials are available
    Check,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = RunConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Produce {
            jobs,
            item,
            count,
            dry_run,
            out,
            dest,
        } => {
            let options = cmd::produce::ProduceOptions {
                jobs,
                item,
                count,
                dry_run,
                out,
                dest,
            };
            let ok = cmd::produce::cmd_produce(config, options).await?;
            return Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE });
        }
        Commands::Timeline { job, item } => {
            cmd::timeline::cmd_timeline(config, &job, item.as_deref()).await?;
        }
        Commands::Probe { file } => {
            cmd::probe::cmd_probe(&config, &file).await?;
        }
        Commands::Check => {
            let ok = cmd::check::cmd_check(config).await;
            return Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE });
        }
    }

    Ok(ExitCode::SUCCESS)
}
