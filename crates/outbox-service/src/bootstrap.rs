//! Wiring from configuration to a running service

use crate::board::{BoardError, BoardTemplateSource, HttpBoard, MemoryBoard, ProjectBoard};
use crate::clock::Clock;
use crate::config::{ConfigError, ConverterKind, RetentionConfig, ServiceConfig};
use crate::registration::RegistrationService;
use outbox_artifact::{
    ArtifactError, ArtifactPreparer, DocumentConverter, FsArtifactStore, PassthroughConverter,
    SofficeConverter,
};
use outbox_ledger::{Ed25519Verifier, JsonFileBackend, Ledger, LedgerCommitter, LedgerError, VerifyError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("failed to open artifact store: {0}")]
    Store(#[from] ArtifactError),

    #[error(transparent)]
    Board(#[from] BoardError),

    #[error("invalid trusted key: {0}")]
    TrustedKey(#[from] VerifyError),

    #[error("soffice converter requested but no binary was found")]
    ConverterMissing,
}

/// Board named by the configuration
///
/// # Errors
/// `Config` when no URL is set for a real board.
pub fn board_from_config(config: &ServiceConfig) -> Result<Arc<dyn ProjectBoard>, BootstrapError> {
    if config.board.mock {
        warn!("using in-memory project board");
        return Ok(Arc::new(MemoryBoard::new()));
    }
    let base_url = config.board.base_url.clone().ok_or_else(|| {
        ConfigError::Validation("board.base_url is required unless board.mock = true".to_string())
    })?;
    Ok(Arc::new(HttpBoard::new(base_url, config.board.token.clone())?))
}

fn converter_from_config(config: &ServiceConfig) -> Result<Arc<dyn DocumentConverter>, BootstrapError> {
    let render = &config.render;
    match render.converter {
        ConverterKind::Passthrough => Ok(Arc::new(PassthroughConverter)),
        ConverterKind::Soffice => {
            let timeout = Duration::from_secs(render.soffice_timeout_secs);
            let converter = match &render.soffice_binary {
                Some(binary) => SofficeConverter::new(binary.clone(), timeout),
                None => SofficeConverter::discover(timeout).ok_or(BootstrapError::ConverterMissing)?,
            };
            info!(binary = %converter.binary().display(), "using soffice converter");
            Ok(Arc::new(converter))
        }
    }
}

/// Trusted signer keys from `[signing]`
///
/// # Errors
/// `TrustedKey` for a malformed key.
pub fn verifier_from_config(config: &ServiceConfig) -> Result<Ed25519Verifier, BootstrapError> {
    let verifier = Ed25519Verifier::new();
    for key in &config.signing.trusted_keys {
        let thumbprint = verifier.trust_hex(&key.public_key, key.common_name.clone())?;
        info!(%thumbprint, common_name = ?key.common_name, "trusted signer key loaded");
    }
    if verifier.is_empty() {
        warn!("no trusted signer keys configured; every submission will be rejected");
    }
    Ok(verifier)
}

/// Open the ledger and storage under `data_dir`
///
/// # Errors
/// Any failure to open storage, the ledger or the configured adapters.
pub fn build(
    config: &ServiceConfig,
    board: Arc<dyn ProjectBoard>,
    clock: Arc<dyn Clock>,
) -> Result<RegistrationService, BootstrapError> {
    let store = Arc::new(FsArtifactStore::open(config.storage.data_dir.clone())?);
    let ledger = Arc::new(Ledger::open(JsonFileBackend::new(config.storage.ledger_path()))?);
    let verifier = Arc::new(verifier_from_config(config)?);
    let converter = converter_from_config(config)?;

    let preparer = ArtifactPreparer::new(Arc::new(BoardTemplateSource::new(board.clone())), converter, store.clone());
    let committer = LedgerCommitter::new(ledger.clone(), store, verifier);

    info!(
        data_dir = %config.storage.data_dir.display(),
        revision = ledger.revision(),
        "ledger opened"
    );
    Ok(RegistrationService::new(
        board,
        preparer,
        ledger,
        committer,
        config.numbering.clone(),
        config.render.clone(),
        config.board.executor_role,
        clock,
    ))
}

/// Run [`RegistrationService::sweep_abandoned`] on the retention interval
///
/// Returns `None` when the sweep is turned off.
pub fn spawn_sweeper(
    service: Arc<RegistrationService>,
    retention: &RetentionConfig,
) -> Option<JoinHandle<()>> {
    let period = retention.sweep_interval()?;
    let older_than = retention.abandoned_after();
    info!(period_secs = period.as_secs(), older_than_hours = older_than.num_hours(), "abandoned registration sweep enabled");
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = service.sweep_abandoned(older_than).await {
                warn!(error = %e, "abandoned registration sweep failed");
            }
        }
    }))
}
