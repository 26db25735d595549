//! Management APN readiness gate.
//!
//! Before a network session the dedicated management APN has to be up.
//! The gate asks the platform to activate it, then waits for a connectivity
//! signal or a timer, retrying a bounded number of times. A confirmed route
//! is remembered until the gate is stopped or a readiness cycle gives up.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::prefs::PrefsStore;
use crate::runtime::{DmRuntime, RuntimeEvent};

/// Immediate answer of the platform to an activation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    AlreadyActive,
    RequestStarted,
    Failed(i32),
}

/// Connectivity control of the host platform.
pub trait ConnectivityPlatform: Send + Sync + 'static {
    fn start_management_apn(&self) -> ActivationOutcome;

    fn stop_management_apn(&self);
}

/// Platform without a dedicated management APN; the default route is always used.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRoute;

impl ConnectivityPlatform for DefaultRoute {
    fn start_management_apn(&self) -> ActivationOutcome {
        ActivationOutcome::AlreadyActive
    }

    fn stop_management_apn(&self) {}
}

/// Why the APN is wanted; decides which failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApnPurpose {
    StartSession,
    ReportSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApnFailure {
    StartSessionGate,
    ReportSessionGate,
    Roaming,
}

impl fmt::Display for ApnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApnFailure::StartSessionGate => f.write_str("management APN unavailable for session start"),
            ApnFailure::ReportSessionGate => f.write_str("management APN unavailable for session report"),
            ApnFailure::Roaming => f.write_str("device is roaming"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApnResult {
    Active { interface: Option<String> },
    Failed(ApnFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataConnectionState {
    Connected,
    Connecting,
    Disconnected,
}

/// Platform notifications fed into the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkSignal {
    ServiceState {
        roaming: bool,
    },
    Connectivity {
        management_apn_connected: bool,
    },
    DataConnection {
        state: DataConnectionState,
        apn: Option<String>,
        interface: Option<String>,
    },
}

#[derive(Debug, Default)]
struct ReadinessRecord {
    retry_count: u32,
    channel_available: bool,
    roaming: bool,
}

pub struct ApnGate {
    platform: Arc<dyn ConnectivityPlatform>,
    prefs: Arc<PrefsStore>,
    runtime: Arc<dyn DmRuntime>,
    check_timeout: Duration,
    max_retries: u32,
    record: Mutex<ReadinessRecord>,
    connected: watch::Sender<bool>,
}

impl ApnGate {
    pub fn new(
        platform: Arc<dyn ConnectivityPlatform>,
        prefs: Arc<PrefsStore>,
        runtime: Arc<dyn DmRuntime>,
        check_timeout: Duration,
        max_retries: u32,
    ) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            platform,
            prefs,
            runtime,
            check_timeout,
            max_retries,
            record: Mutex::new(ReadinessRecord::default()),
            connected,
        }
    }

    /// Bring the management APN up, or report why it could not be.
    ///
    /// `max_retries` counts attempts after the first one, each waiting up to
    /// the check timeout for a connectivity signal.
    pub async fn request_activation(&self, purpose: ApnPurpose) -> ApnResult {
        if self.record.lock().channel_available {
            tracing::debug!("[apn] route already confirmed");
            return self.activated(purpose);
        }

        let mut connected = self.connected.subscribe();
        loop {
            self.connected.send_replace(false);
            connected.borrow_and_update();

            match self.platform.start_management_apn() {
                ActivationOutcome::AlreadyActive => return self.activated(purpose),
                ActivationOutcome::RequestStarted => {
                    tracing::debug!("[apn] activation requested, waiting {:?}", self.check_timeout)
                }
                ActivationOutcome::Failed(code) => {
                    tracing::warn!("[apn] activation request failed with {}, waiting for signal", code)
                }
            }

            let signalled = matches!(
                tokio::time::timeout(self.check_timeout, connected.wait_for(|up| *up)).await,
                Ok(Ok(_))
            );
            if signalled {
                return self.activated(purpose);
            }

            let retry = {
                let mut record = self.record.lock();
                if record.retry_count < self.max_retries {
                    record.retry_count += 1;
                    Some(record.retry_count)
                } else {
                    None
                }
            };
            match retry {
                Some(attempt) => {
                    tracing::warn!(
                        "[apn] no connectivity after {:?}, retry {}/{}",
                        self.check_timeout,
                        attempt,
                        self.max_retries
                    );
                    self.persist_retry_count(attempt);
                }
                None => return self.give_up(purpose),
            }
        }
    }

    /// Feed a platform notification.
    pub fn on_signal(&self, signal: NetworkSignal) {
        match signal {
            NetworkSignal::ServiceState { roaming } => {
                self.record.lock().roaming = roaming;
            }
            NetworkSignal::Connectivity {
                management_apn_connected: true,
            } => {
                tracing::debug!("[apn] management APN connected");
                self.connected.send_replace(true);
            }
            NetworkSignal::Connectivity { .. } => {}
            NetworkSignal::DataConnection {
                state: DataConnectionState::Connected,
                interface: Some(interface),
                apn,
            } => {
                tracing::debug!("[apn] data connected on {} ({:?})", interface, apn);
                if let Err(e) = self.prefs.set_apn_interface_name(&interface) {
                    tracing::warn!("[apn] failed to record interface name: {}", e);
                }
            }
            NetworkSignal::DataConnection { .. } => {}
        }
    }

    /// Tear down the APN and forget the confirmed route.
    pub fn stop(&self) {
        self.platform.stop_management_apn();
        self.reset();
    }

    pub fn is_channel_available(&self) -> bool {
        self.record.lock().channel_available
    }

    fn activated(&self, purpose: ApnPurpose) -> ApnResult {
        let roaming = {
            let mut record = self.record.lock();
            record.retry_count = 0;
            record.channel_available = !record.roaming;
            record.roaming
        };
        self.persist_retry_count(0);

        if roaming {
            tracing::warn!("[apn] roaming, tearing down management APN");
            self.platform.stop_management_apn();
            return ApnResult::Failed(ApnFailure::Roaming);
        }

        let interface = self.prefs.apn_interface_name();
        tracing::info!("[apn] ready for {:?} on {:?}", purpose, interface);
        if let Err(e) = self.runtime.emit(RuntimeEvent::ApnStateReady {
            interface: interface.clone(),
        }) {
            tracing::warn!("[apn] failed to emit readiness: {}", e);
        }
        ApnResult::Active { interface }
    }

    fn give_up(&self, purpose: ApnPurpose) -> ApnResult {
        tracing::warn!("[apn] giving up on management APN for {:?}", purpose);
        self.stop();
        ApnResult::Failed(match purpose {
            ApnPurpose::StartSession => ApnFailure::StartSessionGate,
            ApnPurpose::ReportSession => ApnFailure::ReportSessionGate,
        })
    }

    fn reset(&self) {
        {
            let mut record = self.record.lock();
            record.retry_count = 0;
            record.channel_available = false;
        }
        self.persist_retry_count(0);
    }

    fn persist_retry_count(&self, count: u32) {
        if let Err(e) = self.prefs.set_apn_retry_count(count) {
            tracing::warn!("[apn] failed to persist retry count: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ChannelRuntime;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct MockPlatform {
        outcomes: Mutex<VecDeque<ActivationOutcome>>,
        fallback: ActivationOutcome,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl MockPlatform {
        fn new(fallback: ActivationOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(VecDeque::new()),
                fallback,
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            })
        }
    }

    impl ConnectivityPlatform for MockPlatform {
        fn start_management_apn(&self) -> ActivationOutcome {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.outcomes.lock().pop_front().unwrap_or(self.fallback)
        }

        fn stop_management_apn(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn gate(
        platform: &Arc<MockPlatform>,
    ) -> (Arc<ApnGate>, Arc<PrefsStore>, mpsc::UnboundedReceiver<RuntimeEvent>) {
        let prefs = Arc::new(PrefsStore::in_memory());
        let (runtime, rx) = ChannelRuntime::channel();
        let gate = Arc::new(ApnGate::new(
            platform.clone(),
            prefs.clone(),
            Arc::new(runtime),
            Duration::from_millis(40),
            1,
        ));
        (gate, prefs, rx)
    }

    #[tokio::test]
    async fn test_already_active() {
        let platform = MockPlatform::new(ActivationOutcome::AlreadyActive);
        let (gate, _prefs, mut rx) = gate(&platform);

        let result = gate.request_activation(ApnPurpose::StartSession).await;

        assert_eq!(result, ApnResult::Active { interface: None });
        assert_eq!(platform.starts.load(Ordering::SeqCst), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            RuntimeEvent::ApnStateReady { interface: None }
        );
    }

    #[tokio::test]
    async fn test_signal_completes_started_request() {
        let platform = MockPlatform::new(ActivationOutcome::RequestStarted);
        let (gate, _prefs, _rx) = gate(&platform);

        let pending = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.request_activation(ApnPurpose::StartSession).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.on_signal(NetworkSignal::Connectivity {
            management_apn_connected: true,
        });

        assert!(matches!(pending.await.unwrap(), ApnResult::Active { .. }));
        assert_eq!(platform.starts.load(Ordering::SeqCst), 1);
        assert!(gate.is_channel_available());
    }

    #[tokio::test]
    async fn test_retries_once_then_fails_start_gate() {
        let platform = MockPlatform::new(ActivationOutcome::RequestStarted);
        let (gate, prefs, mut rx) = gate(&platform);

        let result = gate.request_activation(ApnPurpose::StartSession).await;

        assert_eq!(result, ApnResult::Failed(ApnFailure::StartSessionGate));
        assert_eq!(platform.starts.load(Ordering::SeqCst), 2);
        assert_eq!(platform.stops.load(Ordering::SeqCst), 1);
        assert_eq!(prefs.snapshot().apn_retry_count, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_report_purpose_fails_report_gate() {
        let platform = MockPlatform::new(ActivationOutcome::Failed(3));
        let (gate, _prefs, _rx) = gate(&platform);

        let result = gate.request_activation(ApnPurpose::ReportSession).await;
        assert_eq!(result, ApnResult::Failed(ApnFailure::ReportSessionGate));
    }

    #[tokio::test]
    async fn test_roaming_tears_down() {
        let platform = MockPlatform::new(ActivationOutcome::AlreadyActive);
        let (gate, _prefs, mut rx) = gate(&platform);
        gate.on_signal(NetworkSignal::ServiceState { roaming: true });

        let result = gate.request_activation(ApnPurpose::StartSession).await;

        assert_eq!(result, ApnResult::Failed(ApnFailure::Roaming));
        assert_eq!(platform.stops.load(Ordering::SeqCst), 1);
        assert!(!gate.is_channel_available());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_confirmed_route_skips_platform() {
        let platform = MockPlatform::new(ActivationOutcome::AlreadyActive);
        let (gate, _prefs, _rx) = gate(&platform);

        gate.request_activation(ApnPurpose::StartSession).await;
        let second = gate.request_activation(ApnPurpose::ReportSession).await;

        assert!(matches!(second, ApnResult::Active { .. }));
        assert_eq!(platform.starts.load(Ordering::SeqCst), 1);

        gate.stop();
        assert!(!gate.is_channel_available());
        gate.request_activation(ApnPurpose::StartSession).await;
        assert_eq!(platform.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_interface_name_recorded_from_data_signal() {
        let platform = MockPlatform::new(ActivationOutcome::AlreadyActive);
        let (gate, prefs, _rx) = gate(&platform);

        gate.on_signal(NetworkSignal::DataConnection {
            state: DataConnectionState::Connecting,
            apn: Some("fota".to_string()),
            interface: Some("ignored0".to_string()),
        });
        gate.on_signal(NetworkSignal::DataConnection {
            state: DataConnectionState::Connected,
            apn: Some("fota".to_string()),
            interface: Some("rmnet1".to_string()),
        });

        assert_eq!(prefs.apn_interface_name().as_deref(), Some("rmnet1"));
        assert_eq!(
            gate.request_activation(ApnPurpose::StartSession).await,
            ApnResult::Active {
                interface: Some("rmnet1".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_failed_request_still_accepts_signal() {
        let platform = MockPlatform::new(ActivationOutcome::Failed(-1));
        let (gate, _prefs, _rx) = gate(&platform);

        let pending = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.request_activation(ApnPurpose::StartSession).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.on_signal(NetworkSignal::Connectivity {
            management_apn_connected: true,
        });

        assert!(matches!(pending.await.unwrap(), ApnResult::Active { .. }));
    }
}
