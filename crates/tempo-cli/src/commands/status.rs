use anyhow::{Context, Result};
use colored::Colorize;
use tempo_core::session::{EngineEvent, SessionState, SyncStatus};
use tokio::sync::broadcast::error::RecvError;

use super::{App, format_elapsed};

pub fn show(app: &App, json: bool) -> Result<()> {
    let snapshot = app.engine.snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot.record)?);
        return Ok(());
    }

    let Some(record) = snapshot.record else {
        println!("{}", "No active session".dimmed());
        return Ok(());
    };
    let state = match snapshot.state {
        SessionState::Running => "running".green().bold(),
        SessionState::Paused => "paused".yellow().bold(),
        SessionState::Idle => "idle".dimmed(),
    };
    println!("{} {} {}", state, record.subject_id, format_elapsed(snapshot.elapsed_secs));
    if let Some(note) = &record.note {
        println!("  {}", note.italic());
    }
    println!("  sync: {}", describe_sync(&app.engine.sync_status()));
    Ok(())
}

fn describe_sync(status: &SyncStatus) -> String {
    match status {
        SyncStatus::LocalOnly => "local only".yellow().to_string(),
        SyncStatus::Idle | SyncStatus::Synced => "ok".green().to_string(),
        SyncStatus::Pending => "pending".to_string(),
        SyncStatus::Failed(message) => format!("{} ({})", "failed".red(), message),
    }
}

pub async fn watch(app: &App) -> Result<()> {
    let mut events = app.engine.subscribe();
    show(app, false)?;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                println!();
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(EngineEvent::Tick { elapsed_secs }) => {
                    print!("\r{} ", format_elapsed(elapsed_secs).bold());
                    std::io::Write::flush(&mut std::io::stdout())?;
                }
                Ok(EngineEvent::ExternalChange { state }) => {
                    println!("\n{} session is now {}", "↻".cyan(), state);
                }
                Ok(EngineEvent::SyncFailed { operation, message }) => {
                    println!("\n{} {}: {}", "sync failed".red(), operation, message);
                }
                Ok(EngineEvent::SyncRestored) => println!("\n{}", "sync restored".green()),
                Ok(EngineEvent::StateChanged { .. }) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}

pub async fn history(app: &App) -> Result<()> {
    let Some(owner_id) = &app.owner_id else {
        println!("{}", "Not signed in: no entries are recorded.".yellow());
        return Ok(());
    };

    let entries = app.durable.entries_for(owner_id).await?;
    if entries.is_empty() {
        println!("{}", "No completed entries".dimmed());
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {:>9}  {}{}",
            entry.ended_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
            format_elapsed(entry.total_duration),
            entry.subject_id.bold(),
            entry
                .note
                .map(|note| format!("  {}", note.dimmed()))
                .unwrap_or_default()
        );
    }
    Ok(())
}
