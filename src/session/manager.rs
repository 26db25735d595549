//! Session manager.
//!
//! Owns the single active session. Requests are queued to one background
//! worker and run strictly in arrival order:
//!
//! ```text
//! Idle -> LockAcquiring -> Running -> Completing -> Idle
//!                            |            ^
//!                            +-> Cancelling
//! ```
//!
//! Engine calls block, so they run on the blocking pool while the worker
//! awaits them. Cancellation is serviced out-of-band: it signals the engine
//! and relies on the in-flight call returning.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::request::{RequestId, SessionKind, SessionRequest, ANY_SESSION};
use crate::engine::{codes, DmEngine, ResultCode};
use crate::error::{OmadmError, Result};
use crate::runtime::{DmRuntime, RuntimeEvent};
use crate::settings::SessionSettings;
use crate::tree::{DmtGuard, DmtLock, LockOwner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    LockAcquiring,
    Running,
    Cancelling,
    Completing,
}

/// The session currently inside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveSession {
    pub request_id: RequestId,
    pub kind: SessionKind,
    pub started_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
}

/// Timings for the manager
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cancel a session that runs longer than this
    pub timeout: Duration,
    /// Wait for the DMT lock before aborting a request
    pub lock_wait: Duration,
    /// Wait for the configuration store before dropping a request
    pub store_wait: Duration,
}

impl From<&SessionSettings> for SessionConfig {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            lock_wait: settings.lock_wait(),
            store_wait: settings.store_wait(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&SessionSettings::default())
    }
}

/// Task sent to the worker
#[derive(Debug)]
enum ManagerTask {
    Run {
        request_id: RequestId,
        request: SessionRequest,
    },
    Shutdown,
}

#[derive(Debug)]
struct Slot {
    state: SessionState,
    active: Option<ActiveSession>,
}

struct Execution {
    result_code: ResultCode,
    bootstrap_server_id: Option<String>,
}

impl From<ResultCode> for Execution {
    fn from(result_code: ResultCode) -> Self {
        Self {
            result_code,
            bootstrap_server_id: None,
        }
    }
}

struct Inner {
    engine: Arc<dyn DmEngine>,
    lock: Arc<DmtLock>,
    runtime: Arc<dyn DmRuntime>,
    store_ready: watch::Receiver<bool>,
    config: SessionConfig,
    slot: Mutex<Slot>,
}

pub struct SessionManager {
    inner: Arc<Inner>,
    task_tx: mpsc::UnboundedSender<ManagerTask>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Create the manager and spawn its worker. Must be called within a tokio runtime.
    pub fn spawn(
        engine: Arc<dyn DmEngine>,
        lock: Arc<DmtLock>,
        runtime: Arc<dyn DmRuntime>,
        store_ready: watch::Receiver<bool>,
        config: SessionConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            engine,
            lock,
            runtime,
            store_ready,
            config,
            slot: Mutex::new(Slot {
                state: SessionState::Idle,
                active: None,
            }),
        });

        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(Arc::clone(&inner), task_rx));

        Self {
            inner,
            task_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a request. Invalid requests are rejected here and never queued.
    ///
    /// [`SessionRequest::Cancel`] is not queued; it is handled like [`SessionManager::cancel`].
    pub fn submit(&self, request_id: RequestId, request: SessionRequest) -> Result<()> {
        if request == SessionRequest::Cancel {
            self.cancel(request_id);
            return Ok(());
        }
        request.validate()?;

        tracing::debug!("[session] queued {} request {}", request.kind(), request_id);
        self.task_tx
            .send(ManagerTask::Run {
                request_id,
                request,
            })
            .map_err(|_| OmadmError::ManagerStopped)
    }

    /// Cancel the active session if its id matches (`ANY_SESSION` matches any).
    ///
    /// A no-op request with the same id is queued behind it so the caller
    /// always receives a result. Returns whether a session was signalled.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        let cancelled = self.inner.cancel_active(request_id);
        let follow_up = ManagerTask::Run {
            request_id,
            request: SessionRequest::NoOp,
        };
        if self.task_tx.send(follow_up).is_err() {
            tracing::warn!("[session] worker stopped, cancel follow-up for {} dropped", request_id);
        }
        cancelled
    }

    pub fn state(&self) -> SessionState {
        self.inner.slot.lock().state
    }

    pub fn active_session(&self) -> Option<ActiveSession> {
        self.inner.slot.lock().active.clone()
    }

    pub fn is_session_in_progress(&self) -> bool {
        self.state() != SessionState::Idle
    }

    /// Stop the worker after the requests already queued have run.
    pub async fn shutdown(&self) {
        let _ = self.task_tx.send(ManagerTask::Shutdown);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!("[session] worker ended abnormally: {}", e);
            }
        }
    }
}

async fn run_worker(inner: Arc<Inner>, mut task_rx: mpsc::UnboundedReceiver<ManagerTask>) {
    tracing::debug!("[session] worker started");

    while let Some(task) = task_rx.recv().await {
        match task {
            ManagerTask::Run {
                request_id,
                request,
            } => inner.process(request_id, request).await,
            ManagerTask::Shutdown => {
                tracing::debug!("[session] worker shutting down");
                break;
            }
        }
    }
}

impl Inner {
    async fn process(self: &Arc<Self>, request_id: RequestId, request: SessionRequest) {
        let kind = request.kind();

        if !self.wait_for_store().await {
            tracing::error!(
                "[session] {}, dropping {} request {}",
                OmadmError::StoreNotReady(self.config.store_wait),
                kind,
                request_id
            );
            return;
        }

        if let SessionRequest::ClientInitiated { delay, .. } = &request {
            if !delay.is_zero() {
                tracing::debug!("[session] delaying request {} by {:?}", request_id, delay);
                tokio::time::sleep(*delay).await;
            }
        }

        self.set_state(SessionState::LockAcquiring);
        let Some(guard) = self.acquire_lock().await else {
            tracing::error!(
                "[session] DMT lock not acquired within {:?}, aborting {} request {}",
                self.config.lock_wait,
                kind,
                request_id
            );
            self.set_state(SessionState::Idle);
            self.emit(RuntimeEvent::SessionAborted {
                request_id,
                reason: OmadmError::LockTimeout(self.config.lock_wait).to_string(),
            });
            return;
        };

        let started_at = Utc::now();
        let deadline = chrono::Duration::from_std(self.config.timeout)
            .ok()
            .and_then(|timeout| started_at.checked_add_signed(timeout));
        {
            let mut slot = self.slot.lock();
            slot.active = Some(ActiveSession {
                request_id,
                kind,
                started_at,
                deadline,
            });
            slot.state = SessionState::Running;
        }
        tracing::info!("[session] {} request {} running", kind, request_id);

        let timer = {
            let inner = Arc::clone(self);
            let timeout = self.config.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::warn!("[session] request {} exceeded {:?}", request_id, timeout);
                inner.cancel_active(request_id);
            })
        };

        // The guard moves with the engine call so the tree is released as soon
        // as the engine returns, without waiting for this task to be polled.
        let engine = Arc::clone(&self.engine);
        let outcome = tokio::task::spawn_blocking(move || {
            let execution = execute(engine.as_ref(), &request);
            drop(guard);
            execution
        })
        .await;
        timer.abort();

        let execution = outcome.unwrap_or_else(|e| {
            tracing::error!("[session] engine call for request {} failed: {}", request_id, e);
            Execution::from(codes::FAIL)
        });

        {
            let mut slot = self.slot.lock();
            slot.active = None;
            slot.state = SessionState::Completing;
        }

        if let Some(server_id) = execution.bootstrap_server_id {
            self.emit(RuntimeEvent::BootstrapServerId {
                request_id,
                server_id,
            });
        }
        tracing::info!(
            "[session] {} request {} finished with {}",
            kind,
            request_id,
            execution.result_code
        );
        self.emit(RuntimeEvent::SessionResult {
            request_id,
            result_code: execution.result_code,
        });
        self.set_state(SessionState::Idle);
    }

    async fn wait_for_store(&self) -> bool {
        let mut ready = self.store_ready.clone();
        let reached = matches!(
            tokio::time::timeout(self.config.store_wait, ready.wait_for(|r| *r)).await,
            Ok(Ok(_))
        );
        reached
    }

    async fn acquire_lock(&self) -> Option<DmtGuard> {
        let lock = Arc::clone(&self.lock);
        let wait = self.config.lock_wait;
        match tokio::task::spawn_blocking(move || lock.acquire_guard(LockOwner::Session, wait)).await {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("[session] lock wait failed: {}", e);
                None
            }
        }
    }

    fn cancel_active(&self, request_id: RequestId) -> bool {
        let mut slot = self.slot.lock();
        let matches = slot
            .active
            .as_ref()
            .is_some_and(|active| request_id == ANY_SESSION || active.request_id == request_id);
        if !matches {
            tracing::debug!("[session] no active session matches cancel for {}", request_id);
            return false;
        }

        slot.state = SessionState::Cancelling;
        tracing::warn!("[session] cancelling active session (requested for {})", request_id);
        self.engine.cancel_active_session();
        true
    }

    fn set_state(&self, state: SessionState) {
        let mut slot = self.slot.lock();
        tracing::debug!("[session] {:?} -> {:?}", slot.state, state);
        slot.state = state;
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Err(e) = self.runtime.emit(event) {
            tracing::warn!("[session] failed to emit event: {}", e);
        }
    }
}

/// Run one request against the engine. Blocks for the whole session.
fn execute(engine: &dyn DmEngine, request: &SessionRequest) -> Execution {
    match request {
        SessionRequest::Pkg0Notification { data } => engine.start_alerted_session(data).into(),
        SessionRequest::Bootstrap { data, binary } => {
            match engine.parse_bootstrap_server_id(data, *binary) {
                Some(server_id) if !server_id.is_empty() => Execution {
                    result_code: engine.process_bootstrap_script(data, *binary, &server_id),
                    bootstrap_server_id: Some(server_id),
                },
                _ => {
                    tracing::warn!("[session] bootstrap document carries no server id");
                    Execution::from(codes::FAIL)
                }
            }
        }
        SessionRequest::ClientInitiated { server_id, .. } => {
            engine.start_client_session(server_id).into()
        }
        SessionRequest::FotaClientInitiated { server_id, alert } => {
            engine.start_fota_client_session(server_id, alert).into()
        }
        SessionRequest::FotaNotify(ctx) => engine.notify_fota(ctx).into(),
        SessionRequest::LawmoNotify(ctx) => engine.notify_lawmo(ctx).into(),
        SessionRequest::Cancel | SessionRequest::NoOp => Execution::from(codes::SESSION_PARAM_ERR),
    }
}
