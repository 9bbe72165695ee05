//! Wiring: configuration in, engine out

use crate::config::{DaemonConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use crate::telegram::TelegramActuator;
use covenant_gate::{
    GatekeeperEngine, OfflineActuator, PermissionActuator, RehearsalActuator, TimeoutActuator,
};
use covenant_ledger::{InMemoryLedger, Ledger, SheetsLedger, SqliteLedger};
use std::sync::Arc;

/// Open the configured ledger
pub async fn build_ledger(storage: &StorageConfig) -> DaemonResult<Arc<dyn Ledger>> {
    let ledger: Arc<dyn Ledger> = match storage {
        StorageConfig::Memory => {
            tracing::warn!("Using in-memory ledger; acknowledgements are lost on exit");
            Arc::new(InMemoryLedger::new())
        }
        StorageConfig::Sqlite {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            tracing::info!(url = %url, "Opening SQLite ledger");
            Arc::new(SqliteLedger::new(url, *max_connections, *connect_timeout_secs).await?)
        }
        StorageConfig::Sheets { .. } => {
            let options = storage
                .sheets_options()
                .ok_or_else(|| DaemonError::Config("incomplete sheets storage".to_string()))?;
            tracing::info!(worksheet = %options.worksheet, "Connecting spreadsheet ledger");
            Arc::new(SheetsLedger::connect(options).await?)
        }
    };
    Ok(ledger)
}

/// Platform client with the per-call time bound applied
pub fn build_telegram(config: &DaemonConfig) -> DaemonResult<TimeoutActuator<TelegramActuator>> {
    if !config.platform.has_token() {
        return Err(DaemonError::Config(
            "platform.bot_token is required".to_string(),
        ));
    }
    let telegram = TelegramActuator::new(
        config.platform.api_base.clone(),
        config.platform.bot_token.clone(),
        // The HTTP client gives up slightly after the actuator bound.
        config.platform.call_timeout() * 2,
    )?;
    Ok(TimeoutActuator::with_limit(
        telegram,
        config.platform.call_timeout(),
    ))
}

/// Actuator stack for the configured mode
///
/// Rehearsal without a bot token runs fully offline: effects are logged and
/// presence lookups report every member as present.
pub fn build_actuator(config: &DaemonConfig) -> DaemonResult<Arc<dyn PermissionActuator>> {
    if config.mode.is_rehearsal() && !config.platform.has_token() {
        tracing::warn!("Rehearsal without bot token; platform lookups are simulated");
        return Ok(Arc::new(RehearsalActuator::new(OfflineActuator, config.mode)));
    }

    Ok(Arc::new(RehearsalActuator::new(
        build_telegram(config)?,
        config.mode,
    )))
}

/// Engine over the configured ledger and actuator
pub async fn build_engine(config: &DaemonConfig) -> DaemonResult<Arc<GatekeeperEngine>> {
    let policy = config.policy.to_policy()?;
    let ledger = build_ledger(&config.storage).await?;
    let actuator = build_actuator(config)?;

    tracing::info!(
        version = %policy.version(),
        mode = ?config.mode,
        restoration = ?policy.restoration(),
        "Gatekeeper engine ready"
    );
    Ok(Arc::new(GatekeeperEngine::new(ledger, actuator, policy)))
}
