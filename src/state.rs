use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::engine::{codes, DmEngine};
use crate::error::{OmadmError, Result};
use crate::network::{
    ApnGate, ApnResult, CallAndDataMonitor, ConnectivityPlatform, NetworkSignal, TelephonySignal,
};
use crate::prefs::PrefsStore;
use crate::runtime::{DmRuntime, RuntimeError, RuntimeEvent};
use crate::session::{RequestId, SessionConfig, SessionManager, SessionRequest, ANY_SESSION};
use crate::settings::{get_with_env_fallback, OmadmSettings};
use crate::tree::{DmtLock, TreeFacade, TreeStatus};

/// Engine tree file; its absence marks a device that was never initialised.
const ROOT_TREE_FILE: &str = "root.wbxml";

/// Forwards events to the host and appends pending follow-up actions after
/// every session result that came from the engine. `SESSION_PARAM_ERR`
/// results (no-ops, cancel acknowledgements) leave the actions pending.
struct FollowUpRuntime {
    inner: Arc<dyn DmRuntime>,
    prefs: Arc<PrefsStore>,
}

#[async_trait]
impl DmRuntime for FollowUpRuntime {
    fn emit(&self, event: RuntimeEvent) -> std::result::Result<(), RuntimeError> {
        let ran_engine = matches!(
            event,
            RuntimeEvent::SessionResult { result_code, .. } if result_code != codes::SESSION_PARAM_ERR
        );
        self.inner.emit(event)?;
        if !ran_engine {
            return Ok(());
        }

        let actions = self
            .prefs
            .take_follow_up_actions()
            .map_err(|e| RuntimeError::EmitFailed(e.to_string()))?;
        for action in actions {
            tracing::info!("[session] follow-up {:?}", action);
            self.inner.emit(RuntimeEvent::FollowUp { action })?;
        }
        Ok(())
    }

    async fn shutdown(&self) -> std::result::Result<(), RuntimeError> {
        self.inner.shutdown().await
    }
}

/// Owned composition of the DM client: one engine, one lock, one session
/// manager and the gates in front of it.
pub struct DmService {
    settings: OmadmSettings,
    data_dir: Option<PathBuf>,
    prefs: Arc<PrefsStore>,
    lock: Arc<DmtLock>,
    sessions: SessionManager,
    tree: TreeFacade,
    apn: ApnGate,
    call_state: CallAndDataMonitor,
    runtime: Arc<dyn DmRuntime>,
    store_ready: watch::Sender<bool>,
}

impl DmService {
    /// Build the service and start the session worker. Must be called within a tokio runtime.
    ///
    /// Sessions wait for [`DmService::mark_store_ready`] before running.
    pub fn new(
        settings: OmadmSettings,
        engine: Arc<dyn DmEngine>,
        platform: Arc<dyn ConnectivityPlatform>,
        runtime: Arc<dyn DmRuntime>,
        prefs: Arc<PrefsStore>,
    ) -> Self {
        let lock = Arc::new(DmtLock::new());
        let (store_ready, store_rx) = watch::channel(false);

        let session_runtime: Arc<dyn DmRuntime> = Arc::new(FollowUpRuntime {
            inner: runtime.clone(),
            prefs: prefs.clone(),
        });
        let sessions = SessionManager::spawn(
            engine.clone(),
            lock.clone(),
            session_runtime,
            store_rx,
            SessionConfig::from(&settings.session),
        );
        let tree = TreeFacade::new(engine, lock.clone(), settings.tree.lock_wait());
        let apn = ApnGate::new(
            platform,
            prefs.clone(),
            runtime.clone(),
            settings.network.apn_check_timeout(),
            settings.network.max_apn_retries,
        );
        let call_state = CallAndDataMonitor::new(runtime.clone());
        let data_dir =
            get_with_env_fallback(&settings.tree.data_dir, &["OMADM_DATA_DIR"], None).map(PathBuf::from);

        Self {
            settings,
            data_dir,
            prefs,
            lock,
            sessions,
            tree,
            apn,
            call_state,
            runtime,
            store_ready,
        }
    }

    pub fn settings(&self) -> &OmadmSettings {
        &self.settings
    }

    pub fn prefs(&self) -> &Arc<PrefsStore> {
        &self.prefs
    }

    pub fn lock(&self) -> &Arc<DmtLock> {
        &self.lock
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn tree(&self) -> &TreeFacade {
        &self.tree
    }

    /// The configuration store is readable; queued sessions may start.
    pub fn mark_store_ready(&self) {
        tracing::debug!("[session] configuration store ready");
        self.store_ready.send_replace(true);
    }

    /// Gate a request on network readiness, then queue it.
    ///
    /// Requests that need no network (bootstrap, no-op, cancel) are queued
    /// directly. A gate that cannot be passed fails the call and nothing is
    /// queued.
    pub async fn request_session(&self, request_id: RequestId, request: SessionRequest) -> Result<()> {
        if request == SessionRequest::Cancel {
            self.sessions.cancel(request_id);
            return Ok(());
        }
        request.validate()?;

        if let Some(purpose) = request.apn_purpose() {
            let network = &self.settings.network;
            if network.wait_for_idle_call
                && !self
                    .call_state
                    .wait_until_ready(network.call_state_wait())
                    .await
            {
                return Err(OmadmError::NetworkUnavailable(
                    "call active or no data network".to_string(),
                ));
            }

            if network.use_management_apn {
                if let ApnResult::Failed(failure) = self.apn.request_activation(purpose).await {
                    tracing::warn!("[apn] request {} not started: {}", request_id, failure);
                    return Err(OmadmError::NetworkUnavailable(failure.to_string()));
                }
            }
        }

        self.sessions.submit(request_id, request)
    }

    /// Cancel the active session; see [`SessionManager::cancel`].
    pub fn cancel_session(&self, request_id: RequestId) -> bool {
        self.sessions.cancel(request_id)
    }

    /// Whether external tree access may proceed.
    ///
    /// On a device whose tree was never written, a no-op session is queued so
    /// the engine initialises it, and the tree reports locked meanwhile.
    pub fn tree_status(&self) -> TreeStatus {
        if let Some(dir) = &self.data_dir {
            if !dir.join(ROOT_TREE_FILE).exists() {
                tracing::info!("[tree] {:?} has no {}, initialising", dir, ROOT_TREE_FILE);
                if let Err(e) = self.sessions.submit(ANY_SESSION, SessionRequest::NoOp) {
                    tracing::warn!("[tree] failed to queue initialisation: {}", e);
                }
                return TreeStatus::Locked;
            }
        }
        self.tree.status()
    }

    pub fn on_network_signal(&self, signal: NetworkSignal) {
        self.apn.on_signal(signal);
    }

    pub fn on_telephony_signal(&self, signal: TelephonySignal) {
        self.call_state.on_signal(signal);
    }

    /// Tear down the management APN and forget the confirmed route.
    pub fn stop_network(&self) {
        self.apn.stop();
        self.call_state.reset();
    }

    /// Drain the session queue, then close the runtime.
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
        if let Err(e) = self.runtime.shutdown().await {
            tracing::warn!("Runtime shutdown failed: {}", e);
        }
    }
}
