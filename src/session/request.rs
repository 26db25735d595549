//! Typed session requests.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::engine::NotifyContext;
use crate::error::{OmadmError, Result};
use crate::network::ApnPurpose;

/// Caller-supplied correlation id echoed in every result event.
pub type RequestId = u64;

/// Cancel target matching whichever session is active.
pub const ANY_SESSION: RequestId = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    /// Server-alerted session from a raw package-0 notification
    Pkg0Notification { data: Vec<u8> },
    /// Bootstrap document, WBXML when `binary`
    Bootstrap { data: Vec<u8>, binary: bool },
    /// Client-initiated session, started after `delay`
    ClientInitiated { server_id: String, delay: Duration },
    FotaClientInitiated { server_id: String, alert: String },
    FotaNotify(NotifyContext),
    LawmoNotify(NotifyContext),
    /// Cancel the active session if its id matches (or the id is [`ANY_SESSION`])
    Cancel,
    /// Reports a parameter error without touching the engine
    NoOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Pkg0Notification,
    Bootstrap,
    ClientInitiated,
    FotaClientInitiated,
    FotaNotify,
    LawmoNotify,
    Cancel,
    NoOp,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionKind::Pkg0Notification => "pkg0",
            SessionKind::Bootstrap => "bootstrap",
            SessionKind::ClientInitiated => "client-initiated",
            SessionKind::FotaClientInitiated => "fota-client",
            SessionKind::FotaNotify => "fota-notify",
            SessionKind::LawmoNotify => "lawmo-notify",
            SessionKind::Cancel => "cancel",
            SessionKind::NoOp => "no-op",
        };
        f.write_str(name)
    }
}

impl SessionRequest {
    pub fn kind(&self) -> SessionKind {
        match self {
            SessionRequest::Pkg0Notification { .. } => SessionKind::Pkg0Notification,
            SessionRequest::Bootstrap { .. } => SessionKind::Bootstrap,
            SessionRequest::ClientInitiated { .. } => SessionKind::ClientInitiated,
            SessionRequest::FotaClientInitiated { .. } => SessionKind::FotaClientInitiated,
            SessionRequest::FotaNotify(_) => SessionKind::FotaNotify,
            SessionRequest::LawmoNotify(_) => SessionKind::LawmoNotify,
            SessionRequest::Cancel => SessionKind::Cancel,
            SessionRequest::NoOp => SessionKind::NoOp,
        }
    }

    /// Reject requests missing their required payload.
    pub fn validate(&self) -> Result<()> {
        let missing = |what: &str| {
            Err(OmadmError::InvalidRequest(format!(
                "{} request without {}",
                self.kind(),
                what
            )))
        };
        match self {
            SessionRequest::Pkg0Notification { data } if data.is_empty() => missing("data"),
            SessionRequest::Bootstrap { data, .. } if data.is_empty() => missing("data"),
            SessionRequest::ClientInitiated { server_id, .. } if server_id.is_empty() => {
                missing("server id")
            }
            SessionRequest::FotaClientInitiated { server_id, .. } if server_id.is_empty() => {
                missing("server id")
            }
            SessionRequest::FotaClientInitiated { alert, .. } if alert.is_empty() => missing("alert"),
            _ => Ok(()),
        }
    }

    /// Management APN purpose, or `None` when the request needs no network.
    pub fn apn_purpose(&self) -> Option<ApnPurpose> {
        match self {
            SessionRequest::Pkg0Notification { .. }
            | SessionRequest::ClientInitiated { .. }
            | SessionRequest::FotaClientInitiated { .. } => Some(ApnPurpose::StartSession),
            SessionRequest::FotaNotify(_) | SessionRequest::LawmoNotify(_) => {
                Some(ApnPurpose::ReportSession)
            }
            SessionRequest::Bootstrap { .. } | SessionRequest::Cancel | SessionRequest::NoOp => None,
        }
    }
}
