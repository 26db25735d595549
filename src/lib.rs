//! OMA-DM client session orchestration.
//!
//! The native engine owns the protocol and the device management tree; this
//! crate decides when it may run. It serializes sessions behind one worker,
//! arbitrates the tree between sessions and external readers with a single
//! lock, and gates network sessions on management-APN readiness.

pub mod engine;
pub mod error;
pub mod network;
pub mod prefs;
pub mod runtime;
pub mod session;
pub mod settings;
pub mod state;
pub mod tree;

#[cfg(feature = "cli")]
pub mod cli;


pub use error::{OmadmError, Result};
pub use state::DmService;
