use anyhow::Result;
use colored::Colorize;

use super::{App, format_elapsed};

pub async fn start(app: &App, subject: String, note: Option<String>) -> Result<()> {
    let record = app.engine.start(subject, note).await?;
    println!("{} {}", "▶ Started".green().bold(), record.subject_id);
    if app.owner_id.is_none() {
        println!(
            "{}",
            "  Not signed in: the session stays on this device until you set an owner.".yellow()
        );
    }
    Ok(())
}

pub async fn pause(app: &App) -> Result<()> {
    let record = app.engine.pause().await?;
    println!(
        "{} {} at {}",
        "⏸ Paused".yellow().bold(),
        record.subject_id,
        format_elapsed(record.paused_accumulated)
    );
    Ok(())
}

pub async fn resume(app: &App) -> Result<()> {
    let record = app.engine.resume().await?;
    println!("{} {}", "▶ Resumed".green().bold(), record.subject_id);
    Ok(())
}

pub async fn stop(app: &App) -> Result<()> {
    let entry = app.engine.stop().await?;
    println!(
        "{} {} after {}",
        "■ Stopped".blue().bold(),
        entry.subject_id,
        format_elapsed(entry.total_duration)
    );
    Ok(())
}

pub async fn reset(app: &App) -> Result<()> {
    app.engine.reset().await?;
    println!("{}", "Session discarded".dimmed());
    Ok(())
}
