//! CLI module for headless operation.
//!
//! The CLI wires the same `DmService` a host embedding would use to an
//! in-memory engine. Instead of delivering events to the host, the channel
//! runtime feeds them to the output loop:
//!
//! ```text
//! +-----------------+     +----------------+     +---------------+
//! | SessionManager  | --> | ChannelRuntime | --> | output.rs     |
//! | ApnGate, ...    |     | (emit())       |     | (print/JSON)  |
//! +-----------------+     +----------------+     +---------------+
//! ```

mod args;
mod bootstrap;
mod output;
mod runner;

pub use args::{Args, Command, NotifyArgs, SessionCommand};
pub use bootstrap::{initialize, CliContext};
pub use output::run_event_loop;
pub use runner::execute;
