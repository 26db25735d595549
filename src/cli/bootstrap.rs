//! CLI bootstrap - Initialize the DM service for CLI usage.
//!
//! The CLI runs the real orchestration (lock, gates, session manager,
//! façade) over an in-memory engine seeded with the requested tree version.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::engine::MemoryEngine;
use crate::network::DefaultRoute;
use crate::prefs::{default_prefs_path, PrefsStore};
use crate::runtime::{ChannelRuntime, RuntimeEvent};
use crate::settings::{OmadmSettings, SettingsManager};
use crate::state::DmService;

use super::args::Args;

/// Context for CLI execution containing the initialized service.
pub struct CliContext {
    pub service: DmService,

    /// Engine behind the service, kept for inspection
    pub engine: Arc<MemoryEngine>,

    /// Event receiver for output handling
    pub event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,

    /// Settings manager
    pub settings_manager: Arc<SettingsManager>,

    /// Command-line arguments
    pub args: Args,
}

impl CliContext {
    /// Graceful shutdown - drain queued sessions and close the event channel.
    pub async fn shutdown(&self) {
        self.service.shutdown().await;
    }
}

/// Initialize the CLI context.
pub async fn initialize(args: &Args) -> Result<CliContext> {
    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        // Only warn on errors other than file not found
        if !matches!(e, dotenvy::Error::Io(_)) {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }

    // Load settings
    let settings_manager = Arc::new(match &args.settings {
        Some(path) => SettingsManager::with_path(path.clone()).await,
        None => SettingsManager::new().await,
    }
    .context("Failed to initialize settings manager")?);

    // Ensure settings file exists (creates template on first run)
    if let Err(e) = settings_manager.ensure_settings_file().await {
        tracing::warn!("Failed to create settings template: {}", e);
    }

    let settings = settings_manager.get().clone();
    init_logging(args, &settings);

    if args.verbose {
        eprintln!(
            "[cli] Settings loaded from {}",
            settings_manager.path().display()
        );
    }

    let prefs_path = settings
        .prefs
        .path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(default_prefs_path);
    let prefs = Arc::new(PrefsStore::open(&prefs_path).context("Failed to open prefs")?);

    if args.verbose {
        eprintln!("[cli] Prefs: {}", prefs_path.display());
        eprintln!("[cli] Tree version: {}", args.tree_version);
    }

    let engine = Arc::new(MemoryEngine::with_tree_version(&args.tree_version));
    let (runtime, event_rx) = ChannelRuntime::channel();

    let service = DmService::new(
        settings,
        engine.clone(),
        Arc::new(DefaultRoute),
        Arc::new(runtime),
        prefs,
    );
    service.mark_store_ready();

    Ok(CliContext {
        service,
        engine,
        event_rx,
        settings_manager,
        args: args.clone(),
    })
}

/// Install the global subscriber; `-v` forces debug, otherwise the settings level applies.
fn init_logging(args: &Args, settings: &OmadmSettings) {
    let log_level = if args.verbose {
        "debug"
    } else {
        settings.advanced.log_level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match format!("omadm_lib={}", log_level).parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(e) => {
            eprintln!("[cli] Ignoring log level '{}': {}", log_level, e);
            filter
        }
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
