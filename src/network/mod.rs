//! Network readiness gates run before a session is handed to the engine.

pub mod apn;
pub mod call_state;

pub use apn::{
    ActivationOutcome, ApnFailure, ApnGate, ApnPurpose, ApnResult, ConnectivityPlatform,
    DataConnectionState, DefaultRoute, NetworkSignal,
};
pub use call_state::{CallAndDataMonitor, CallState, TelephonySignal};
