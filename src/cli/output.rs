//! CLI output handling - Event receiver loop and result printing.
//!
//! Events arrive from the service via the runtime channel and are rendered
//! as terminal lines or JSON lines depending on the output mode.

use std::io::{self, Write};

use anyhow::Result;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::runtime::RuntimeEvent;
use crate::tree::{DmtData, ProfileRow};

/// Run the event loop until the channel closes.
///
/// Returns the last session result code seen, if any.
pub async fn run_event_loop(
    mut event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    json_mode: bool,
) -> Result<Option<i32>> {
    let mut last_result = None;

    while let Some(event) = event_rx.recv().await {
        if let RuntimeEvent::SessionResult { result_code, .. } = &event {
            last_result = Some(*result_code);
        }

        if json_mode {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("{}", format_event(&event));
        }
        io::stdout().flush()?;
    }

    Ok(last_result)
}

/// Render an event for terminal output.
pub fn format_event(event: &RuntimeEvent) -> String {
    match event {
        RuntimeEvent::SessionResult {
            request_id,
            result_code,
        } => format!("[session] {} finished with {}", request_id, result_code),
        RuntimeEvent::BootstrapServerId {
            request_id,
            server_id,
        } => format!("[session] {} bootstrapped server {}", request_id, server_id),
        RuntimeEvent::SessionAborted { request_id, reason } => {
            format!("[session] {} aborted: {}", request_id, reason)
        }
        RuntimeEvent::ApnStateReady { interface } => format!(
            "[apn] ready on {}",
            interface.as_deref().unwrap_or("default route")
        ),
        RuntimeEvent::CallAndDataReady => "[callstate] call idle, data available".to_string(),
        RuntimeEvent::FollowUp { action } => format!("[follow-up] {:?}", action),
    }
}

/// Print a command result, as JSON or through `human`.
pub fn print_result<T, F>(value: &T, json_mode: bool, human: F) -> Result<()>
where
    T: Serialize + ?Sized,
    F: FnOnce(&T) -> String,
{
    if json_mode {
        println!("{}", serde_json::to_string(value)?);
    } else {
        println!("{}", human(value));
    }
    io::stdout().flush()?;
    Ok(())
}

pub fn format_rows(rows: &[ProfileRow]) -> String {
    if rows.is_empty() {
        return "(no profiles)".to_string();
    }
    rows.iter()
        .map(|row| {
            format!(
                "{}\t{}",
                row.root_node,
                row.server_id.as_deref().unwrap_or("-")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_node(data: &DmtData) -> String {
    match data {
        DmtData::Node(children) if children.is_empty() => "(interior, no children)".to_string(),
        DmtData::Node(children) => children.join("\n"),
        other => other.to_string(),
    }
}

/// Strings print bare; everything else as pretty JSON.
pub fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
