//! Live telemetry watch: poll + stream until interrupted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use carlink_core::store::VehicleSnapshot;

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output::print_update;

use super::{build_coordinator, persist_tokens, restore_session};

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (coordinator, mut cfg) = build_coordinator()?;
    restore_session(&coordinator, &cfg).await?;

    let mut snapshots = coordinator.store().subscribe();
    coordinator.start().await?;

    if !global.quiet {
        eprintln!("Watching telemetry (Ctrl-C to stop)...");
    }

    // Timestamp high-water mark per (vin, key), so each accepted merge
    // prints exactly once.
    let mut seen: HashMap<(String, String), DateTime<Utc>> = HashMap::new();
    // Prime with the initial poll results already in the store.
    prime(&mut seen, &snapshots.borrow_and_update());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snaps = snapshots.borrow_and_update().clone();
                report_new(&mut seen, &snaps, args.vin.as_deref());
            }
        }
    }

    coordinator.shutdown().await;

    // Tokens rotate during long watches; persist the latest set and
    // the container id assigned on first run.
    persist_tokens(&coordinator).await?;
    if cfg.container_id.is_none() {
        if let Some(id) = coordinator.container_id().await {
            cfg.container_id = Some(id);
            carlink_config::save_config(&cfg)?;
        }
    }
    Ok(())
}

fn prime(seen: &mut HashMap<(String, String), DateTime<Utc>>, snaps: &[VehicleSnapshot]) {
    for snap in snaps {
        for (key, stored) in &snap.values {
            seen.insert((snap.vin.to_string(), key.clone()), stored.timestamp);
        }
    }
}

fn report_new(
    seen: &mut HashMap<(String, String), DateTime<Utc>>,
    snaps: &[VehicleSnapshot],
    vin_filter: Option<&str>,
) {
    for snap in snaps {
        if vin_filter.is_some_and(|vin| vin != snap.vin.as_str()) {
            continue;
        }
        for (key, stored) in &snap.values {
            let slot = (snap.vin.to_string(), key.clone());
            let newer = seen.get(&slot).is_none_or(|prev| stored.timestamp > *prev);
            if newer {
                print_update(
                    &snap.vin,
                    key,
                    &stored.value,
                    stored.unit.as_deref(),
                    stored.source,
                );
                seen.insert(slot, stored.timestamp);
            }
        }
    }
}
