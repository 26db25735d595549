// Runtime abstraction for event delivery.
//
// The session manager and the network gates never talk to the host directly:
// results and readiness notifications are emitted through a `DmRuntime`,
// which the embedding (JNI bridge, CLI, tests) implements.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::engine::ResultCode;
use crate::prefs::FollowUpAction;

pub mod channel;

pub use channel::ChannelRuntime;

/// Runtime-specific errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to emit event: {0}")]
    EmitFailed(String),

    #[error("Event receiver closed")]
    ReceiverClosed,
}

/// Events delivered to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// Terminal outcome of a queued request
    SessionResult {
        request_id: u64,
        result_code: ResultCode,
    },

    /// Server id parsed from a bootstrap document, sent before its result
    BootstrapServerId { request_id: u64, server_id: String },

    /// Request dropped before reaching the engine
    SessionAborted { request_id: u64, reason: String },

    /// Management APN is up and usable
    ApnStateReady { interface: Option<String> },

    /// Call is idle and a data network is present
    CallAndDataReady,

    /// Sticky follow-up work consumed after a session result
    FollowUp { action: FollowUpAction },
}

/// Event sink for the host environment.
///
/// # Object Safety
/// This trait is object-safe and intended to be used as `Arc<dyn DmRuntime>`.
#[async_trait]
pub trait DmRuntime: Send + Sync + 'static {
    /// Emit an event to the host.
    ///
    /// # Errors
    /// Returns `RuntimeError::ReceiverClosed` if nobody listens anymore.
    fn emit(&self, event: RuntimeEvent) -> Result<(), RuntimeError>;

    /// Graceful shutdown - flush events, close channels, etc.
    async fn shutdown(&self) -> Result<(), RuntimeError>;
}
