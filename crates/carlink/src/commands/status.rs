//! Coordinator status display.

use owo_colors::OwoColorize;
use tabled::Tabled;

use crate::cli::{GlobalOpts, StatusArgs};
use crate::error::CliError;
use crate::output::{format_age, print_table};

use super::{build_coordinator, restore_session};

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Vehicle")]
    vehicle: String,
    #[tabled(rename = "Values")]
    values: usize,
    #[tabled(rename = "Last poll")]
    last_poll: String,
    #[tabled(rename = "Last stream")]
    last_stream: String,
}

pub async fn handle(args: StatusArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (coordinator, cfg) = build_coordinator()?;
    // Status works without credentials; it just reports the state.
    match restore_session(&coordinator, &cfg).await {
        Ok(()) => {}
        Err(CliError::NotAuthorized) => tracing::debug!("no stored tokens"),
        Err(e) => return Err(e),
    }

    let diag = coordinator.diagnostics().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&diag)?);
        return Ok(());
    }

    let state = match diag.auth_state {
        "authorized" => diag.auth_state.green().to_string(),
        "expired" => diag.auth_state.red().to_string(),
        other => other.yellow().to_string(),
    };
    println!("Auth state:  {state}");
    if let Some(token) = &diag.token {
        println!("Token expiry: {} ({})", token.expires_at, token.account_id);
    }
    println!(
        "Call budget: {}/{} used this window",
        diag.budget.used, diag.budget.ceiling
    );
    println!(
        "Poll cadence: every {}",
        humantime::format_duration(coordinator.config().poll_interval)
    );

    if !diag.vehicles.is_empty() && !global.quiet {
        println!();
        print_table(
            diag.vehicles
                .iter()
                .map(|v| StatusRow {
                    vehicle: format!("{} {} ({})", v.brand, v.model, v.vin),
                    values: v.telemetry_count,
                    last_poll: format_age(v.last_poll),
                    last_stream: format_age(v.last_stream),
                })
                .collect(),
        );
    }
    Ok(())
}
