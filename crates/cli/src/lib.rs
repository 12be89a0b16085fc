pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

#[derive(Debug, Parser)]
#[command(
    name = "parley",
    about = "Parley operator CLI",
    long_about = "Operate the Parley reply pipeline: migrations, readiness checks, config inspection, campaign import and offline classification.",
    after_help = "Examples:\n  parley doctor --json\n  parley campaign import campaigns.toml\n  parley classify \"Would you take $1,800?\" --asking 2500 --minimum 1500"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, collaborator readiness, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Classify a buyer message and show the negotiation decision, offline")]
    Classify {
        #[arg(help = "Buyer message text")]
        text: String,
        #[arg(long, help = "Campaign asking price")]
        asking: Option<Decimal>,
        #[arg(long, help = "Campaign minimum acceptable price")]
        minimum: Option<Decimal>,
    },
    #[command(subcommand, about = "Manage campaigns")]
    Campaign(CampaignCommand),
}

#[derive(Debug, Subcommand)]
enum CampaignCommand {
    #[command(about = "Create or replace campaigns from a TOML file of [[campaign]] tables")]
    Import {
        #[arg(help = "Path to the campaign file")]
        path: PathBuf,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Classify { text, asking, minimum } => {
            commands::classify::run(&text, asking, minimum)
        }
        Command::Campaign(CampaignCommand::Import { path }) => commands::campaign::import(&path),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
