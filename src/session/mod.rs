//! Session lifecycle: typed requests and the single-session manager.

pub mod manager;
pub mod request;

pub use manager::{ActiveSession, SessionConfig, SessionManager, SessionState};
pub use request::{RequestId, SessionKind, SessionRequest, ANY_SESSION};
