//! omadm CLI - Headless interface to the DM session orchestration
//!
//! Runs the session manager, tree façade and network gates against an
//! in-memory engine, for scripting and manual testing.
//!
//! # Usage
//!
//! ```bash
//! # Build the CLI binary
//! cargo build --features cli --bin omadm-cli
//!
//! # Client-initiated session
//! ./target/debug/omadm-cli session client OP1
//!
//! # Create a profile and print its locator
//! ./target/debug/omadm-cli insert PROVIDER-ID=op.example DMUNIQUENAME=op
//!
//! # JSON output for scripting
//! ./target/debug/omadm-cli --json session --id 4 pkg0 0a0b0c | jq .
//! ```

use anyhow::Result;
use clap::Parser;

use omadm_lib::cli::{execute, initialize, Args};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let ctx = initialize(&args).await?;
    let last_result = execute(ctx).await?;

    // A failing engine result becomes the exit status
    if let Some(code) = last_result.filter(|code| *code != 0) {
        std::process::exit(code);
    }
    Ok(())
}
