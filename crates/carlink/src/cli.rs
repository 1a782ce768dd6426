//! Argument parsing for the `carlink` binary.

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "carlink",
    version,
    about = "Vehicle telemetry via BMW CarData",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Assume yes for confirmation prompts.
    #[arg(short, long, global = true)]
    pub yes: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Authorize this machine via the OAuth device flow.
    Login,

    /// Remove stored credentials.
    Logout,

    /// List vehicles mapped to the account.
    Vehicles,

    /// Show coordinator status and the API call budget.
    Status(StatusArgs),

    /// Poll and stream telemetry, printing updates until interrupted.
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Emit machine-readable JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only show values for this VIN.
    #[arg(long)]
    pub vin: Option<String>,
}
