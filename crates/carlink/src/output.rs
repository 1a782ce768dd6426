//! Table rendering and value formatting for command output.

use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use serde_json::Value;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use carlink_core::store::VehicleSnapshot;
use carlink_core::{Source, Vin};

#[derive(Tabled)]
pub struct VehicleRow {
    #[tabled(rename = "VIN")]
    pub vin: String,
    #[tabled(rename = "Brand")]
    pub brand: String,
    #[tabled(rename = "Model")]
    pub model: String,
    #[tabled(rename = "Year")]
    pub year: String,
    #[tabled(rename = "Propulsion")]
    pub propulsion: String,
}

impl From<&VehicleSnapshot> for VehicleRow {
    fn from(snap: &VehicleSnapshot) -> Self {
        Self {
            vin: snap.vin.to_string(),
            brand: snap.info.brand.clone(),
            model: snap.info.model.clone(),
            year: snap
                .info
                .construction_year
                .map_or_else(|| "-".into(), |y| y.to_string()),
            propulsion: if snap.info.propulsion.is_empty() {
                "-".into()
            } else {
                snap.info.propulsion.clone()
            },
        }
    }
}

/// Render rows with the shared table style.
pub fn print_table<T: Tabled>(rows: Vec<T>) {
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

/// One line per telemetry update in `watch` output.
pub fn print_update(vin: &Vin, key: &str, value: &Value, unit: Option<&str>, source: Source) {
    let shown = display_value(value);
    let unit = unit.unwrap_or("");
    let tag = match source {
        Source::Poll => "poll".dimmed().to_string(),
        Source::Stream => "stream".green().to_string(),
    };
    println!(
        "{}  {}  {} {}{}",
        Utc::now().format("%H:%M:%S"),
        format!("[{tag}] {vin}"),
        key.bold(),
        shown,
        unit
    );
}

/// Human display form of a raw telemetry value.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// "3m ago" style rendering for optional timestamps.
pub fn format_age(ts: Option<DateTime<Utc>>) -> String {
    let Some(ts) = ts else {
        return "never".into();
    };
    match (Utc::now() - ts).to_std() {
        Ok(age) => format!(
            "{} ago",
            humantime::format_duration(std::time::Duration::from_secs(age.as_secs()))
        ),
        Err(_) => "just now".into(),
    }
}
