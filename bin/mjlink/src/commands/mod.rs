pub mod action;
pub mod config_cmd;
pub mod listen;
pub mod tasks_cmd;

use mjlink_core::{Config, Paths};
use mjlink_gateway::CorrelationEngine;

/// Load the config, open the gateway and wait until it is ready.
pub(crate) async fn connect() -> anyhow::Result<CorrelationEngine> {
    let config = Config::load_or_default(&Paths::new())?;
    let engine = CorrelationEngine::from_config(&config, None)?;
    let user = engine.init().await?;
    tracing::info!(user_id = %user.id, "Gateway ready");
    Ok(engine)
}
