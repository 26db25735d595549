//! Call and data readiness.
//!
//! Network sessions are deferred while a voice call is active. Readiness is
//! reached once a data network is known and the call state is idle, and
//! stays latched until reset.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::runtime::{DmRuntime, RuntimeEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Ringing,
    OffHook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelephonySignal {
    /// Service state update; `data_network_known` when the data radio type is known
    ServiceState { data_network_known: bool },
    CallState(CallState),
    DataConnection { connected: bool },
}

#[derive(Debug)]
struct Telephony {
    call_state: CallState,
    data_network_known: bool,
}

pub struct CallAndDataMonitor {
    state: Mutex<Telephony>,
    ready: watch::Sender<bool>,
    runtime: Arc<dyn DmRuntime>,
}

impl CallAndDataMonitor {
    pub fn new(runtime: Arc<dyn DmRuntime>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            state: Mutex::new(Telephony {
                call_state: CallState::Idle,
                data_network_known: false,
            }),
            ready,
            runtime,
        }
    }

    /// Feed a telephony notification. Returns `true` if it made the device ready.
    pub fn on_signal(&self, signal: TelephonySignal) -> bool {
        if self.is_ready() {
            return false;
        }

        let ready = {
            let mut state = self.state.lock();
            match signal {
                TelephonySignal::ServiceState { data_network_known } => {
                    state.data_network_known = data_network_known;
                    data_network_known
                }
                TelephonySignal::CallState(call_state) => {
                    state.call_state = call_state;
                    call_state == CallState::Idle && state.data_network_known
                }
                TelephonySignal::DataConnection { connected } => {
                    if connected {
                        state.data_network_known = true;
                    }
                    connected && state.call_state == CallState::Idle
                }
            }
        };

        if !ready {
            return false;
        }
        tracing::info!("[callstate] call idle with data network");
        self.ready.send_replace(true);
        if let Err(e) = self.runtime.emit(RuntimeEvent::CallAndDataReady) {
            tracing::warn!("[callstate] failed to emit readiness: {}", e);
        }
        true
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait for readiness. Returns `false` if `max_wait` elapsed first.
    pub async fn wait_until_ready(&self, max_wait: Duration) -> bool {
        let mut ready = self.ready.subscribe();
        let reached = matches!(
            tokio::time::timeout(max_wait, ready.wait_for(|r| *r)).await,
            Ok(Ok(_))
        );
        if !reached {
            tracing::warn!("[callstate] not ready after {:?}", max_wait);
        }
        reached
    }

    /// Drop the latch so the next session waits for fresh signals.
    pub fn reset(&self) {
        self.ready.send_replace(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ChannelRuntime;

    fn monitor() -> (
        Arc<CallAndDataMonitor>,
        tokio::sync::mpsc::UnboundedReceiver<RuntimeEvent>,
    ) {
        let (runtime, rx) = ChannelRuntime::channel();
        (Arc::new(CallAndDataMonitor::new(Arc::new(runtime))), rx)
    }

    #[test]
    fn test_known_data_network_is_ready() {
        let (monitor, mut rx) = monitor();
        assert!(monitor.on_signal(TelephonySignal::ServiceState {
            data_network_known: true
        }));
        assert!(monitor.is_ready());
        assert_eq!(rx.try_recv().unwrap(), RuntimeEvent::CallAndDataReady);
    }

    #[test]
    fn test_call_must_end_before_data_counts() {
        let (monitor, _rx) = monitor();
        assert!(!monitor.on_signal(TelephonySignal::CallState(CallState::OffHook)));
        assert!(!monitor.on_signal(TelephonySignal::DataConnection { connected: true }));
        assert!(!monitor.is_ready());

        assert!(monitor.on_signal(TelephonySignal::CallState(CallState::Idle)));
        assert!(monitor.is_ready());
    }

    #[test]
    fn test_idle_without_data_is_not_ready() {
        let (monitor, _rx) = monitor();
        assert!(!monitor.on_signal(TelephonySignal::CallState(CallState::Idle)));
        assert!(!monitor.on_signal(TelephonySignal::DataConnection { connected: false }));
        assert!(!monitor.is_ready());
    }

    #[test]
    fn test_readiness_latches_until_reset() {
        let (monitor, mut rx) = monitor();
        monitor.on_signal(TelephonySignal::DataConnection { connected: true });
        assert!(!monitor.on_signal(TelephonySignal::CallState(CallState::Idle)));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        monitor.reset();
        assert!(!monitor.is_ready());
    }

    #[tokio::test]
    async fn test_wait_until_ready() {
        let (monitor, _rx) = monitor();
        assert!(!monitor.wait_until_ready(Duration::from_millis(10)).await);

        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.wait_until_ready(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        monitor.on_signal(TelephonySignal::ServiceState {
            data_network_known: true,
        });
        assert!(waiter.await.unwrap());
    }
}
