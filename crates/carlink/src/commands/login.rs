//! Device-authorization login flow.

use owo_colors::OwoColorize;

use crate::cli::GlobalOpts;
use crate::error::CliError;

use super::{build_coordinator, persist_tokens};

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let (coordinator, _cfg) = build_coordinator()?;

    let authz = coordinator.credentials().begin_device_authorization().await?;

    if !global.quiet {
        println!("To authorize this machine, open:");
        println!("    {}", authz.verification_uri_complete.cyan().underline());
        println!("and enter the code:");
        println!("    {}", authz.user_code.bold());
        println!();
        println!(
            "Waiting for authorization (expires in {})...",
            humantime::format_duration(std::time::Duration::from_secs(authz.expires_in))
        );
    }

    coordinator.credentials().wait_for_authorization(&authz).await?;
    persist_tokens(&coordinator).await?;

    if !global.quiet {
        let account = coordinator
            .credentials()
            .tokens_snapshot()
            .await
            .map_or_else(String::new, |t| t.account_id);
        println!("{} Authorized as {account}", "✓".green());
    }
    Ok(())
}
