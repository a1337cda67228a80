//! Operator console
//!
//! Polls a running fieldwatch server and surfaces one pending incident at a
//! time. Keys (followed by Enter):
//!   c  confirm (approve a bypass request, acknowledge anything else)
//!   d  defer until the next cycle
//!   q  quit
//!
//! Usage:
//!   cargo run --bin fieldwatch-console -- --server http://127.0.0.1:8080

use clap::Parser;
use fieldwatch::domain::{Incident, ResolveAction};
use fieldwatch::infra::Config;
use fieldwatch::io::HttpAlertSource;
use fieldwatch::services::{EscalationSession, OperatorDecision, SessionUpdate};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fieldwatch-console", version, about = "Operator console for pending incidents")]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Server base URL (overrides escalation.server_url)
    #[arg(short, long)]
    server: Option<String>,
}

fn print_incident(incident: &Incident) {
    println!();
    println!("== {} ==", incident.kind);
    println!("  subject : {}", incident.subject_id);
    println!("  raised  : {}", incident.created_at.to_rfc3339());
    if let Some(detail) = &incident.detail {
        println!("  detail  : {detail}");
    }
    println!("  [c] {}  [d] defer  [q] quit", incident.kind.confirm_action().as_str());
}

fn print_update(update: &SessionUpdate) {
    match update {
        SessionUpdate::Presented(incident) => print_incident(incident),
        SessionUpdate::Cleared => println!("no pending incidents"),
        SessionUpdate::Resolved { incident_id, action } => {
            let verb = match action {
                ResolveAction::Approve => "approved",
                ResolveAction::Acknowledge => "acknowledged",
            };
            println!("{verb} {incident_id}");
        }
        SessionUpdate::AlreadyHandled { incident_id } => {
            println!("{incident_id} was already handled by another operator")
        }
        SessionUpdate::ResolveFailed { incident_id, error } => {
            println!("could not resolve {incident_id}: {error}")
        }
        SessionUpdate::Deferred { incident_id } => println!("deferred {incident_id}"),
        SessionUpdate::RefreshFailed { error } => println!("unable to refresh: {error}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref());
    let server = args.server.unwrap_or_else(|| config.server_url().to_string());

    let source = Arc::new(HttpAlertSource::new(&server, config.poll_timeout())?);
    info!(server = %source.base_url(), interval_secs = %config.poll_interval().as_secs(), "console_started");

    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let handle = EscalationSession::new(source, config.poll_timeout()).spawn(config.poll_interval(), updates_tx);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            update = updates_rx.recv() => {
                let Some(update) = update else { break };
                print_update(&update);
            }
            line = lines.next_line() => {
                let decision = match line?.as_deref().map(str::trim) {
                    None | Some("q") => break,
                    Some("c") => OperatorDecision::Confirm,
                    Some("d") => OperatorDecision::Defer,
                    Some("") => continue,
                    Some(other) => {
                        println!("unknown key {other:?}; use c, d or q");
                        continue;
                    }
                };
                if !handle.decide(decision).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.teardown().await;
    Ok(())
}
