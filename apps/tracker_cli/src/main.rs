use std::{future::Future, path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use clap::Parser;
use execution_tracker::{
    ExecutionSnapshot, ExecutionStore, ExecutionTracker, FrameTransport, HttpRunLauncher,
    RunLauncher, SessionPhase, TrackerEvent, WsTransport,
};
use serde::Serialize;
use shared::domain::{LogEntry, RunId};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::load_settings;

/// Follows a workflow run's live progress and prints the final node states.
#[derive(Parser, Debug)]
struct Args {
    /// Run to track.
    #[arg(long, conflicts_with = "workflow_id")]
    run_id: Option<String>,
    /// Start this workflow first and track the run it creates.
    #[arg(long)]
    workflow_id: Option<String>,
    #[arg(long)]
    ws_base: Option<String>,
    #[arg(long)]
    api_base: Option<String>,
    /// Settings file; `tracker.toml` in the working directory when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowEnd {
    Interrupted,
    Finished,
}

#[derive(Serialize)]
struct RunSummary {
    phase: SessionPhase,
    #[serde(flatten)]
    snapshot: ExecutionSnapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(ws_base) = args.ws_base {
        settings.ws_base = ws_base;
    }
    if let Some(api_base) = args.api_base {
        settings.api_base = api_base;
    }

    let run_id = match (args.run_id, args.workflow_id) {
        (Some(run_id), _) => RunId::from(run_id),
        (None, Some(workflow_id)) => {
            HttpRunLauncher::new(settings.api_base.as_str())
                .start_run(&workflow_id)
                .await?
        }
        (None, None) => bail!("either --run-id or --workflow-id is required"),
    };

    let transport: Arc<dyn FrameTransport> = Arc::new(WsTransport::new(&settings.ws_base)?);
    let tracker = ExecutionTracker::new(
        transport,
        ExecutionStore::shared(),
        settings.tracker_options(),
    );
    let mut events = tracker.subscribe();
    tracker.start(run_id.clone()).await;

    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for ctrl-c; follow until the run ends");
            std::future::pending::<()>().await;
        }
    };
    if follow_events(&mut events, interrupt).await == FollowEnd::Interrupted {
        info!(run_id = %run_id, "interrupted; stopping tracker");
        tracker.stop().await;
    }

    let phase = tracker.phase().await;
    let snapshot = tracker.store().read().await.snapshot();
    println!(
        "{}",
        serde_json::to_string_pretty(&RunSummary { phase, snapshot })?
    );

    if phase == SessionPhase::Failed {
        bail!("gave up reconnecting to run {run_id}");
    }
    Ok(())
}

/// Prints node updates until the run reaches a terminal phase or `interrupt`
/// resolves. `interrupt` is polled across iterations, never recreated.
async fn follow_events<F>(events: &mut broadcast::Receiver<TrackerEvent>, interrupt: F) -> FollowEnd
where
    F: Future<Output = ()>,
{
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            _ = &mut interrupt => return FollowEnd::Interrupted,
            event = events.recv() => match event {
                Ok(TrackerEvent::NodeUpdated { entry, .. }) => print_entry(&entry),
                Ok(TrackerEvent::PhaseChanged { phase, .. }) if phase.is_terminal() => {
                    return FollowEnd::Finished;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "tracker events lagged; progress output is incomplete");
                }
                Err(RecvError::Closed) => return FollowEnd::Finished,
            },
        }
    }
}

fn print_entry(entry: &LogEntry) {
    let mut line = format!(
        "{} {:<8} {} ({})",
        entry.timestamp.format("%H:%M:%S%.3f"),
        entry.status.as_str(),
        entry.node_id,
        entry.node_type
    );
    if let Some(label) = &entry.node_label {
        line.push_str(&format!(" \"{label}\""));
    }
    if let Some(duration_ms) = entry.duration_ms {
        line.push_str(&format!(" {duration_ms}ms"));
    }
    if let Some(error) = &entry.error {
        line.push_str(&format!(" error: {error}"));
    }
    println!("{line}");
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
