//! Funnel Analyzer CLI - main entry point
//!
//! Runs the event-log funnel and experiment analysis and prints the report.

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use funnel_analyzer::report::{self, OutputFormat, Sections};
use funnel_analyzer::{pipeline, Config};

#[derive(Parser)]
#[command(name = "funnel_analyzer")]
#[command(about = "Event-log funnel and A/A/B experiment analyzer", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a YAML config (default: funnel.yml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Tab-separated event log
    #[arg(short, long, global = true)]
    input: Option<PathBuf>,

    /// Keep only events dated strictly after this day (YYYY-MM-DD)
    #[arg(long, global = true, conflicts_with = "no_cutoff")]
    cutoff: Option<NaiveDate>,

    /// Disable the date filter
    #[arg(long, global = true, default_value_t = false)]
    no_cutoff: bool,

    /// Output format: table, markdown, json, yaml
    #[arg(short, long, global = true, default_value = "table")]
    format: String,

    /// Write the report to a file instead of stdout
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cleaning report and log summary
    Summary,
    /// Event counts and funnel conversion
    Funnel,
    /// Users per experiment group
    Groups,
    /// Two-proportion z-tests for every configured comparison
    Test,
    /// All stages
    Run,
}

impl Commands {
    fn sections(&self) -> Sections {
        match self {
            Commands::Summary => Sections {
                summary: true,
                ..Sections::NONE
            },
            Commands::Funnel => Sections {
                funnel: true,
                ..Sections::NONE
            },
            Commands::Groups => Sections {
                groups: true,
                ..Sections::NONE
            },
            Commands::Test => Sections {
                groups: true,
                tests: true,
                ..Sections::NONE
            },
            Commands::Run => Sections::ALL,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Logs go to stderr so the report on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("funnel_analyzer=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = OutputFormat::parse(&cli.format)?;

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(input) = cli.input {
        config.input_path = input;
    }
    if cli.no_cutoff {
        config.date_cutoff = None;
    } else if let Some(cutoff) = cli.cutoff {
        config.date_cutoff = Some(cutoff);
    }

    let analysis = pipeline::run(&config)
        .with_context(|| format!("Analysis of {} failed", config.input_path.display()))?;
    let rendered = report::render(&analysis, format, cli.command.sections())?;

    match cli.output {
        Some(path) => report::persist(&path, &rendered)?,
        None => println!("{}", rendered),
    }

    Ok(())
}
