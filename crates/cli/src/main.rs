//! Squat Coach CLI
//!
//! A command-line tool for submitting squat videos, following and
//! cancelling analysis jobs, and preparing captured training data.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{dataset, jobs};
use std::path::PathBuf;

/// Squat Coach CLI
#[derive(Parser)]
#[command(name = "coach")]
#[command(author, version, about = "CLI for the Squat Coach service", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via COACH_API_URL env var)
    #[arg(long, env = "COACH_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a video already in the service's upload directory
    Submit {
        /// User the job belongs to
        user: i64,

        /// Stored file name, or its path as seen by the service
        video: PathBuf,

        /// Video duration in seconds
        #[arg(long)]
        duration: u64,

        /// Caption recorded as the dataset label
        #[arg(long)]
        caption: Option<String>,

        /// Return as soon as the job is admitted
        #[arg(long)]
        no_wait: bool,
    },

    /// Upload a local video and analyze it
    Upload {
        /// User the job belongs to
        user: i64,

        /// Local video file
        file: PathBuf,

        /// Video duration in seconds
        #[arg(long)]
        duration: u64,

        /// Caption recorded as the dataset label
        #[arg(long)]
        caption: Option<String>,

        /// Return as soon as the job is admitted
        #[arg(long)]
        no_wait: bool,
    },

    /// Show a user's active job and remaining quota
    Status {
        /// User to inspect
        user: i64,
    },

    /// Cancel a user's active job
    Cancel {
        /// User whose job to cancel
        user: i64,
    },

    /// Show service health
    Health,

    /// Work with captured training data
    #[command(subcommand)]
    Dataset(DatasetCommands),

    /// Manage CLI settings
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum DatasetCommands {
    /// Center, scale and smooth recorded sequences for training
    Preprocess {
        /// Input sequences file (JSON lines)
        #[arg(long, short)]
        input: PathBuf,

        /// Output file
        #[arg(long, short)]
        output: PathBuf,

        /// Smoothing factor in (0, 1]
        #[arg(long)]
        ema_alpha: Option<f32>,

        /// Skip temporal smoothing
        #[arg(long)]
        no_smooth: bool,
    },

    /// Show record and label counts
    Stats {
        /// Input sequences file (JSON lines)
        #[arg(long, short)]
        input: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective settings
    Show,

    /// Persist defaults
    Set {
        /// Default API endpoint URL
        #[arg(long)]
        api_url: Option<String>,

        /// Default output format (table or json)
        #[arg(long)]
        default_format: Option<output::OutputFormat>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = config::Config::load()?;
    let format = cli
        .format
        .or_else(|| {
            settings
                .default_format
                .as_deref()
                .and_then(output::OutputFormat::parse)
        })
        .unwrap_or_default();

    let api_url = settings.resolve_api_url(cli.api_url);
    let connect = || client::ApiClient::new(&api_url);

    match cli.command {
        Commands::Submit {
            user,
            video,
            duration,
            caption,
            no_wait,
        } => {
            jobs::submit(&connect()?, user, &video, duration, caption, !no_wait, format).await?;
        }
        Commands::Upload {
            user,
            file,
            duration,
            caption,
            no_wait,
        } => {
            jobs::upload(&connect()?, user, &file, duration, caption, !no_wait, format).await?;
        }
        Commands::Status { user } => {
            jobs::status(&connect()?, user, format).await?;
        }
        Commands::Cancel { user } => {
            jobs::cancel(&connect()?, user, format).await?;
        }
        Commands::Health => {
            jobs::health(&connect()?, format).await?;
        }
        Commands::Dataset(dataset_cmd) => match dataset_cmd {
            DatasetCommands::Preprocess {
                input,
                output,
                ema_alpha,
                no_smooth,
            } => {
                dataset::preprocess(&input, &output, ema_alpha, no_smooth, format)?;
            }
            DatasetCommands::Stats { input } => {
                dataset::show_stats(&input, format)?;
            }
        },
        Commands::Config(config_cmd) => {
            configure(settings.clone(), config_cmd, &api_url, format)?;
        }
    }

    Ok(())
}

fn configure(
    mut settings: config::Config,
    command: ConfigCommands,
    effective_url: &str,
    format: output::OutputFormat,
) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let effective = config::Config {
                api_url: Some(effective_url.to_string()),
                default_format: settings.default_format.clone(),
            };
            output::print_json(&effective)?;
        }
        ConfigCommands::Set {
            api_url,
            default_format,
        } => {
            if api_url.is_none() && default_format.is_none() {
                output::print_warning("Nothing to set");
                return Ok(());
            }
            if let Some(url) = api_url {
                url::Url::parse(&url).map_err(|e| anyhow::anyhow!("Invalid API URL: {}", e))?;
                settings.api_url = Some(url);
            }
            if let Some(default_format) = default_format {
                settings.default_format = Some(
                    match default_format {
                        output::OutputFormat::Table => "table",
                        output::OutputFormat::Json => "json",
                    }
                    .to_string(),
                );
            }
            let path = settings.save()?;
            if format == output::OutputFormat::Table {
                output::print_success(&format!("Saved settings to {}", path.display()));
            }
        }
    }
    Ok(())
}
