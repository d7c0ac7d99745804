pub mod commands;

use clap::{Parser, Subcommand};
use openrag_core::config::{AppConfig, LogFormat};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "openrag",
    about = "OpenRAG analytics agent CLI",
    long_about = "Answer questions from analytics datasets and the web, inspect effective configuration, and check readiness.",
    after_help = "Examples:\n  openrag ask \"人口最多的五個城市\" --json\n  openrag config\n  openrag doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run a question through the pipeline and print the answer")]
    Ask {
        #[arg(help = "Natural-language question")]
        question: String,
        #[arg(long, help = "Answer language (defaults to pipeline.default_language)")]
        language: Option<String>,
        #[arg(long, help = "Routing hint: full, analytics or web")]
        condition: Option<String>,
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config and collaborator readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Ask { question, language, condition, json } => {
            commands::ask::run(commands::ask::AskArgs { question, language, condition, json })
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so command output on stdout stays parseable.
pub fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    // A subscriber may already be installed when commands run in-process.
    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
