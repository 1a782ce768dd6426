// ── Diagnostics snapshot ──
//
// A serializable dump of coordinator internals for bug reports and the
// CLI `status` command. Secret material never appears here; VINs are
// masked to their last four characters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::credentials::AuthState;
use crate::discovery::KeySummary;
use crate::store::StoredValue;

/// Credential view: expiry and account only, never token material.
#[derive(Debug, Clone, Serialize)]
pub struct TokenDiagnostics {
    pub account_id: String,
    pub expires_at: DateTime<Utc>,
    /// Seconds until expiry; negative once expired.
    pub expires_in_secs: i64,
}

/// Rate-budget view at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetDiagnostics {
    pub ceiling: usize,
    pub used: usize,
    pub remaining: usize,
    /// Age in seconds of the oldest call still inside the window.
    pub oldest_call_age_secs: Option<u64>,
    /// Ages in seconds of every call in the window, oldest first.
    pub call_ages_secs: Vec<u64>,
}

/// One vehicle's state, including the stored values.
#[derive(Debug, Clone, Serialize)]
pub struct VehicleDiagnostics {
    pub vin: String,
    pub brand: String,
    pub model: String,
    pub propulsion: String,
    pub construction_year: Option<u16>,
    pub telemetry_count: usize,
    pub values: BTreeMap<String, StoredValue>,
    pub last_poll: Option<DateTime<Utc>>,
    pub last_stream: Option<DateTime<Utc>>,
}

/// Full coordinator diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub generated_at: DateTime<Utc>,
    pub auth_state: &'static str,
    pub token: Option<TokenDiagnostics>,
    pub budget: BudgetDiagnostics,
    pub vehicles: Vec<VehicleDiagnostics>,
    pub keys: Vec<KeySummary>,
}

pub(crate) fn auth_state_name(state: AuthState) -> &'static str {
    match state {
        AuthState::NotAuthorized => "not_authorized",
        AuthState::Pending => "pending",
        AuthState::Authorized => "authorized",
        AuthState::Expired => "expired",
    }
}

/// Mask a VIN to its last four characters.
pub fn mask_vin(vin: &str) -> String {
    let chars: Vec<char> = vin.chars().collect();
    if chars.len() <= 4 {
        return vin.to_owned();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vin_masking_keeps_last_four() {
        assert_eq!(mask_vin("WBA000TEST0000001"), "*************0001");
        assert_eq!(mask_vin("ABC"), "ABC");
    }

    #[test]
    fn diagnostics_serialize_to_json() {
        let diag = Diagnostics {
            generated_at: Utc::now(),
            auth_state: auth_state_name(AuthState::Authorized),
            token: Some(TokenDiagnostics {
                account_id: "acct-1".into(),
                expires_at: Utc::now(),
                expires_in_secs: 1_800,
            }),
            budget: BudgetDiagnostics {
                ceiling: 50,
                used: 3,
                remaining: 47,
                oldest_call_age_secs: Some(120),
                call_ages_secs: vec![120, 60, 5],
            },
            vehicles: Vec::new(),
            keys: Vec::new(),
        };

        let json = serde_json::to_value(&diag).expect("serializable");
        assert_eq!(json["auth_state"], "authorized");
        assert_eq!(json["budget"]["remaining"], 47);
        assert_eq!(json["budget"]["call_ages_secs"][1], 60);
        assert_eq!(json["token"]["account_id"], "acct-1");
    }
}
