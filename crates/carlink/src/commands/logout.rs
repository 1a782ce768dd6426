//! Credential removal.

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    if !confirm("Remove stored credentials?", global.yes)? {
        return Ok(());
    }

    carlink_config::clear_tokens()?;
    if !global.quiet {
        eprintln!("Credentials removed");
    }
    Ok(())
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
fn confirm(message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))
}
