mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{} {err}", "error:".red().bold());
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), error::CliError> {
    match cli.command {
        Command::Login => commands::login::handle(&cli.global).await,
        Command::Logout => commands::logout::handle(&cli.global),
        Command::Vehicles => commands::vehicles::handle(&cli.global).await,
        Command::Status(args) => commands::status::handle(args, &cli.global).await,
        Command::Watch(args) => commands::watch::handle(args, &cli.global).await,
    }
}
