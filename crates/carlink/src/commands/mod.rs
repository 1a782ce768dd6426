//! Command handlers and shared coordinator setup.

pub mod login;
pub mod logout;
pub mod status;
pub mod vehicles;
pub mod watch;

use carlink_core::Coordinator;

use crate::error::CliError;

/// Build a coordinator from the config file. Does not restore tokens.
pub fn build_coordinator() -> Result<(Coordinator, carlink_config::Config), CliError> {
    let cfg = carlink_config::load_config_or_default();
    let coordinator_config = carlink_config::to_coordinator_config(&cfg)?;
    let coordinator = Coordinator::new(coordinator_config)?;
    Ok((coordinator, cfg))
}

/// Install persisted tokens and container id into a coordinator.
pub async fn restore_session(
    coordinator: &Coordinator,
    cfg: &carlink_config::Config,
) -> Result<(), CliError> {
    let tokens = carlink_config::load_tokens()?;
    coordinator.install_tokens(tokens).await;
    if let Some(ref id) = cfg.container_id {
        coordinator.set_container_id(id.clone()).await;
    }
    Ok(())
}

/// Persist possibly-rotated tokens back to the keyring.
pub async fn persist_tokens(coordinator: &Coordinator) -> Result<(), CliError> {
    if let Some(tokens) = coordinator.credentials().tokens_snapshot().await {
        carlink_config::save_tokens(&tokens)?;
    }
    Ok(())
}
