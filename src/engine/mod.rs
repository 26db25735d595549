//! Capability surface of the native DM engine.
//!
//! The engine owns the SyncML protocol and the persistent tree. This crate
//! only orchestrates it: every call below is blocking and may take as long
//! as a full server round-trip, so callers run them off the async executor.

pub mod memory;

use serde::{Deserialize, Serialize};

pub use memory::MemoryEngine;

/// Integer outcome reported by the engine, forwarded to callers verbatim.
pub type ResultCode = i32;

/// Well-known result codes.
pub mod codes {
    use super::ResultCode;

    pub const SUCCESS: ResultCode = 0;
    pub const FAIL: ResultCode = 1;
    /// Reported for requests that never reached the engine (no-op, cancel follow-up).
    pub const SESSION_PARAM_ERR: ResultCode = 2;
}

/// Payload of a FOTA or LAWMO notification session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyContext {
    pub result: Option<String>,
    pub package_uri: Option<String>,
    pub alert_type: Option<String>,
    pub server_id: Option<String>,
    pub correlator: Option<String>,
}

/// Native engine operations used by the session manager and the tree façade.
///
/// Tree calls must only be issued while the caller holds the DMT lock.
pub trait DmEngine: Send + Sync + 'static {
    /// Server-alerted session from a raw package-0 notification.
    fn start_alerted_session(&self, pkg0: &[u8]) -> ResultCode;

    /// Client-initiated session towards `server_id`.
    fn start_client_session(&self, server_id: &str) -> ResultCode;

    /// Client-initiated FOTA session carrying a generic alert.
    fn start_fota_client_session(&self, server_id: &str, alert: &str) -> ResultCode;

    fn notify_fota(&self, ctx: &NotifyContext) -> ResultCode;

    fn notify_lawmo(&self, ctx: &NotifyContext) -> ResultCode;

    /// Ask the session currently inside the engine to stop. Must not block.
    fn cancel_active_session(&self);

    /// Node info in the engine's text form (`value=...` / `children:...`),
    /// or a failure string starting with `can't`.
    fn node_info(&self, path: &str) -> String;

    fn create_interior(&self, path: &str) -> ResultCode;

    fn create_leaf(&self, path: &str, value: &str) -> ResultCode;

    fn delete_node(&self, path: &str) -> ResultCode;

    fn parse_bootstrap_server_id(&self, data: &[u8], binary: bool) -> Option<String>;

    fn process_bootstrap_script(&self, data: &[u8], binary: bool, server_id: &str) -> ResultCode;
}
