pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "sizer",
    about = "Sizer operator CLI",
    long_about = "Inspect configuration, check readiness, apply migrations, run offline sizing \
                  calculations and manage bot users.",
    after_help = "Examples:\n  sizer doctor --json\n  sizer config\n  sizer calc kafka --set messages_per_sec=5000 --set message_size_kb=2 --set retention_hours=72 --set replication_factor=3"
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
    #[command(about = "Validate config, bot token, adjustment model and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run a sizing calculation offline without the bot")]
    Calc {
        #[arg(help = "Flow to size: kafka | kubernetes | redis | rabbitmq")]
        flow: String,
        #[arg(long = "set", value_name = "NAME=VALUE", help = "Parameter value, repeatable")]
        set: Vec<String>,
        #[arg(long, help = "Free-text additional conditions")]
        conditions: Option<String>,
        #[arg(long, help = "Ask the configured adjustment model when conditions are given")]
        with_model: bool,
    },
    #[command(about = "Show a user's recent calculations and payments")]
    History {
        #[arg(long, help = "Bot user id")]
        user: i64,
        #[arg(long, default_value_t = 5)]
        limit: u32,
    },
    #[command(about = "Grant or revoke admin alerts for a user")]
    Admin {
        user_id: i64,
        #[arg(long, help = "Revoke instead of grant")]
        revoke: bool,
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
        Command::Calc { flow, set, conditions, with_model } => {
            commands::calc::run(commands::calc::CalcRequest {
                flow,
                assignments: set,
                conditions,
                with_model,
            })
        }
        Command::History { user, limit } => commands::history::run(user, limit),
        Command::Admin { user_id, revoke } => commands::admin::run(user_id, !revoke),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
