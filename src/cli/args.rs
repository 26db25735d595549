//! CLI argument parsing using clap.
//!
//! Defines the command-line interface for omadm-cli.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::engine::NotifyContext;

/// omadm CLI - drive DM sessions and tree access against the in-memory engine
#[derive(Parser, Debug, Clone)]
#[command(name = "omadm-cli")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Settings file (default: ~/.omadm/settings.toml)
    #[arg(long, env = "OMADM_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Value of ./DevInfo/DmV seeded into the engine
    #[arg(long, default_value = "1.2")]
    pub tree_version: String,

    /// Output results and events as JSON lines (for scripting/parsing)
    #[arg(long)]
    pub json: bool,

    /// Show verbose output (debug information)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Report whether the tree is available for external access
    Status,

    /// List server profiles, or one profile by root node name
    Query {
        #[arg(long)]
        root: Option<String>,
    },

    /// Read a single tree node
    Node { path: String },

    /// Create a profile from TAG=VALUE pairs (e.g. PROVIDER-ID=srv DMUNIQUENAME=p1)
    Insert {
        #[arg(required = true, value_parser = parse_key_value)]
        values: Vec<(String, String)>,
    },

    /// Delete a profile by root node name
    Delete { name: String },

    /// Print a setting by dotted key (e.g. session.timeout_secs), or the
    /// settings file and all values
    Config { key: Option<String> },

    /// Queue a session request and print its events
    Session {
        /// Request id echoed in every event (0 targets any session on cancel)
        #[arg(long, default_value_t = 1)]
        id: u64,

        #[command(subcommand)]
        kind: SessionCommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommand {
    /// Client-initiated session
    Client {
        server_id: String,

        /// Start the session after this many seconds
        #[arg(long, default_value_t = 0)]
        delay_secs: u64,
    },

    /// Server-alerted session from a hex-encoded package-0 notification
    Pkg0 { hex: String },

    /// Bootstrap from a document on disk
    Bootstrap {
        file: PathBuf,

        /// The document is plain XML rather than WBXML
        #[arg(long)]
        text: bool,
    },

    /// Client-initiated FOTA session with a generic alert
    FotaClient { server_id: String, alert: String },

    /// Report a FOTA result
    FotaNotify(NotifyArgs),

    /// Report a LAWMO result
    LawmoNotify(NotifyArgs),

    /// Request that reaches no engine call
    Noop,

    /// Cancel the active session
    Cancel,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct NotifyArgs {
    #[arg(long)]
    pub result: Option<String>,

    #[arg(long)]
    pub package_uri: Option<String>,

    #[arg(long)]
    pub alert_type: Option<String>,

    #[arg(long)]
    pub server_id: Option<String>,

    #[arg(long)]
    pub correlator: Option<String>,
}

impl From<NotifyArgs> for NotifyContext {
    fn from(args: NotifyArgs) -> Self {
        NotifyContext {
            result: args.result,
            package_uri: args.package_uri,
            alert_type: args.alert_type,
            server_id: args.server_id,
            correlator: args.correlator,
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected TAG=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty tag in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default_values() {
        let args = Args::parse_from(["omadm-cli", "status"]);
        assert_eq!(args.tree_version, "1.2");
        assert!(args.settings.is_none());
        assert!(!args.json);
        assert!(!args.verbose);
        assert!(matches!(args.command, Command::Status));
    }

    #[test]
    fn test_args_output_modes() {
        let args = Args::parse_from(["omadm-cli", "--json", "-v", "query"]);
        assert!(args.json);
        assert!(args.verbose);
        assert!(matches!(args.command, Command::Query { root: None }));
    }

    #[test]
    fn test_args_insert_pairs() {
        let args = Args::parse_from([
            "omadm-cli",
            "insert",
            "PROVIDER-ID=srv",
            "DMUNIQUENAME=p1",
            "APPADDR/ADDR=https://dm.example/a=b",
        ]);
        let Command::Insert { values } = args.command else {
            panic!("expected insert");
        };
        assert_eq!(values[0], ("PROVIDER-ID".to_string(), "srv".to_string()));
        assert_eq!(
            values[2],
            (
                "APPADDR/ADDR".to_string(),
                "https://dm.example/a=b".to_string()
            )
        );
    }

    #[test]
    fn test_args_insert_rejects_bare_tag() {
        assert!(Args::try_parse_from(["omadm-cli", "insert", "PROVIDER-ID"]).is_err());
        assert!(Args::try_parse_from(["omadm-cli", "insert", "=x"]).is_err());
        assert!(Args::try_parse_from(["omadm-cli", "insert"]).is_err());
    }

    #[test]
    fn test_args_config_key() {
        let args = Args::parse_from(["omadm-cli", "config", "network.max_apn_retries"]);
        assert!(matches!(
            args.command,
            Command::Config { key: Some(ref key) } if key == "network.max_apn_retries"
        ));
        let args = Args::parse_from(["omadm-cli", "config"]);
        assert!(matches!(args.command, Command::Config { key: None }));
    }

    #[test]
    fn test_args_session_commands() {
        let args = Args::parse_from([
            "omadm-cli",
            "session",
            "--id",
            "7",
            "client",
            "OP1",
            "--delay-secs",
            "3",
        ]);
        match args.command {
            Command::Session {
                id,
                kind: SessionCommand::Client {
                    server_id,
                    delay_secs,
                },
            } => {
                assert_eq!(id, 7);
                assert_eq!(server_id, "OP1");
                assert_eq!(delay_secs, 3);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let args = Args::parse_from([
            "omadm-cli",
            "session",
            "fota-notify",
            "--result",
            "200",
            "--correlator",
            "c1",
        ]);
        let Command::Session {
            kind: SessionCommand::FotaNotify(notify),
            ..
        } = args.command
        else {
            panic!("expected fota-notify");
        };
        let ctx = NotifyContext::from(notify);
        assert_eq!(ctx.result.as_deref(), Some("200"));
        assert_eq!(ctx.correlator.as_deref(), Some("c1"));
        assert!(ctx.package_uri.is_none());
    }
}
