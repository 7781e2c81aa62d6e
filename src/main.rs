//! hybrid-compose CLI
//!
//! Entry point for the `hybrid-compose` command-line tool.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use hybrid_compose::config::load_config;
use hybrid_compose::pipeline::{Pipeline, PipelineOptions};
use hybrid_compose::signal::SignalHandler;

#[derive(Parser)]
#[command(name = "hybrid-compose")]
#[command(about = "Compose-pipeline orchestrator", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: compose, layer, publish
    Run {
        /// Path to the compose config file
        #[arg(long, short = 'c')]
        config: PathBuf,

        /// Target directory for compose output and the published layer
        #[arg(long, short = 't')]
        target_dir: PathBuf,

        /// Print the plan without executing anything
        #[arg(long)]
        dry_run: bool,

        /// Progress commentary on stderr
        #[arg(long, short = 'v')]
        verbose: bool,
    },

    /// Validate a config file and print a short summary
    Validate {
        /// Path to the compose config file
        #[arg(long, short = 'c')]
        config: PathBuf,
    },

    /// Re-run only the layering stage against an existing compose output
    Merge {
        /// Path to the compose config file
        #[arg(long, short = 'c')]
        config: PathBuf,

        /// Target directory holding the compose output
        #[arg(long, short = 't')]
        target_dir: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            target_dir,
            dry_run,
            verbose,
        } => run_pipeline(config, target_dir, dry_run, verbose),
        Commands::Validate { config } => run_validate(config),
        Commands::Merge { config, target_dir } => run_merge(config, target_dir),
    }
}

fn install_signals() -> SignalHandler {
    let handler = SignalHandler::new();
    if let Err(e) = handler.install() {
        eprintln!("warning: failed to install signal handler: {e}");
    }
    handler
}

fn run_pipeline(config: PathBuf, target_dir: PathBuf, dry_run: bool, verbose: bool) {
    let pipeline = Pipeline::new(PipelineOptions {
        config_path: config,
        target_dir,
        verbose,
    });

    if dry_run {
        match pipeline.plan() {
            Ok(lines) => {
                for line in lines {
                    println!("{line}");
                }
                process::exit(0);
            }
            Err(e) => {
                eprintln!("error: {e}");
                process::exit(e.exit_code());
            }
        }
    }

    let signals = install_signals();
    match pipeline.run(&signals.cancel_flag()) {
        Ok(report) => {
            if let Some(id) = &report.compose_id {
                println!("compose: {id}");
            }
            println!("published: {}", report.published.path.display());
        }
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(e.exit_code());
        }
    }
}

fn run_validate(config_path: PathBuf) {
    match load_config(&config_path) {
        Ok((config, source)) => {
            println!(
                "{} {} ({}): ok",
                config.release_name, config.release_version, config.release_short
            );
            println!("config sha256: {}", source.sha256);
            if !config.skip_phases.is_empty() {
                let phases: Vec<_> = config.skip_phases.iter().map(|p| p.as_str()).collect();
                println!("skipping phases: {}", phases.join(", "));
            }
            println!(
                "layering: {} + {} repo(s) -> {}",
                config.layering.variant,
                config.layering.repos.len(),
                config.layering.name
            );
        }
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

fn run_merge(config: PathBuf, target_dir: PathBuf) {
    let pipeline = Pipeline::new(PipelineOptions {
        config_path: config,
        target_dir,
        verbose: false,
    });

    let signals = install_signals();
    match pipeline.merge_only(&signals.cancel_flag()) {
        Ok(layer) => println!("published: {}", layer.path.display()),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(e.exit_code());
        }
    }
}
