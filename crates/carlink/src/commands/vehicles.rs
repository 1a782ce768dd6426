//! Vehicle listing.

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output::{print_table, VehicleRow};

use super::{build_coordinator, persist_tokens, restore_session};

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let (coordinator, cfg) = build_coordinator()?;
    restore_session(&coordinator, &cfg).await?;

    coordinator.discover_vehicles().await?;
    persist_tokens(&coordinator).await?;

    let snapshots = coordinator.store().snapshot_all();
    if snapshots.is_empty() {
        if !global.quiet {
            eprintln!("No vehicles mapped to this account");
        }
        return Ok(());
    }

    print_table(snapshots.iter().map(VehicleRow::from).collect());
    Ok(())
}
