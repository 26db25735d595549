//! CLI execution runner.
//!
//! Runs one command against the service while the event loop prints what the
//! session worker reports, then drains the queue and shuts down.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use crate::session::SessionRequest;
use crate::settings::SettingsManager;
use crate::tree::TreeStatus;

use super::args::{Command, SessionCommand};
use super::bootstrap::CliContext;
use super::output::{format_node, format_rows, format_value, print_result, run_event_loop};

/// Execute the parsed command and wait for all of its events.
///
/// Returns the last session result code, if a session ran.
pub async fn execute(ctx: CliContext) -> Result<Option<i32>> {
    let CliContext {
        service,
        event_rx,
        settings_manager,
        args,
        ..
    } = ctx;
    let json_mode = args.json;

    let output_handle: JoinHandle<Result<Option<i32>>> =
        tokio::spawn(async move { run_event_loop(event_rx, json_mode).await });

    let result = run_command(&service, &settings_manager, args.command, json_mode).await;

    // Queued sessions finish before the channel closes
    service.shutdown().await;

    let last_result = match output_handle.await {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            tracing::warn!("Output handler error: {}", e);
            None
        }
        Err(e) => {
            tracing::warn!("Output handler panicked: {}", e);
            None
        }
    };

    result.map(|_| last_result)
}

async fn run_command(
    service: &crate::DmService,
    settings: &SettingsManager,
    command: Command,
    json_mode: bool,
) -> Result<()> {
    match command {
        Command::Status => print_result(&service.tree_status(), json_mode, |status| match status {
            TreeStatus::Available => "available".to_string(),
            TreeStatus::Locked => "locked".to_string(),
        }),
        Command::Query { root } => {
            let selection = root.map(|name| format!("rootnode='{}'", name));
            let rows = service.tree().query_async(selection).await?;
            print_result(rows.as_slice(), json_mode, format_rows)
        }
        Command::Node { path } => {
            let data = service.tree().read_node_async(path).await?;
            print_result(&data, json_mode, format_node)
        }
        Command::Insert { values } => {
            let values: BTreeMap<String, String> = values.into_iter().collect();
            let locator = service.tree().insert_async(values).await?;
            print_result(&locator, json_mode, |l| l.clone())
        }
        Command::Delete { name } => {
            service
                .tree()
                .delete_async(format!("rootnode='{}'", name))
                .await?;
            print_result(&name, json_mode, |n| format!("deleted {}", n))
        }
        Command::Config { key } => {
            let value = config_value(settings, key.as_deref())?;
            print_result(&value, json_mode, format_value)
        }
        Command::Session { id, kind } => {
            let request = session_request(kind).await?;
            service.request_session(id, request).await?;
            Ok(())
        }
    }
}

fn config_value(settings: &SettingsManager, key: Option<&str>) -> Result<serde_json::Value> {
    match key {
        Some(key) => settings.get_value(key),
        None => Ok(serde_json::json!({
            "path": settings.path(),
            "settings": settings.get(),
        })),
    }
}

/// Build the typed request for a session subcommand.
async fn session_request(kind: SessionCommand) -> Result<SessionRequest> {
    let request = match kind {
        SessionCommand::Client {
            server_id,
            delay_secs,
        } => SessionRequest::ClientInitiated {
            server_id,
            delay: Duration::from_secs(delay_secs),
        },
        SessionCommand::Pkg0 { hex } => SessionRequest::Pkg0Notification {
            data: hex::decode(hex.trim()).context("Invalid package-0 hex")?,
        },
        SessionCommand::Bootstrap { file, text } => SessionRequest::Bootstrap {
            data: tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read bootstrap file: {}", file.display()))?,
            binary: !text,
        },
        SessionCommand::FotaClient { server_id, alert } => {
            SessionRequest::FotaClientInitiated { server_id, alert }
        }
        SessionCommand::FotaNotify(notify) => SessionRequest::FotaNotify(notify.into()),
        SessionCommand::LawmoNotify(notify) => SessionRequest::LawmoNotify(notify.into()),
        SessionCommand::Noop => SessionRequest::NoOp,
        SessionCommand::Cancel => SessionRequest::Cancel,
    };
    Ok(request)
}
