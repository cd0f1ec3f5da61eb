//! CLI output formatting

use crate::execution::ServiceEvent;
use crate::persistence::{RunStatus, RunSummary};
use console::Emoji;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// One-line summary of a recorded run
pub fn format_run_summary(summary: &RunSummary) -> String {
    let icon = match summary.status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed => CROSS,
    };
    let duration = summary
        .duration()
        .to_std()
        .map(format_duration)
        .unwrap_or_else(|_| "-".to_string());

    format!(
        "{} {} - {} - {} - {} ({}) - {}",
        icon,
        style(short_id(&summary.run_id.to_string())).dim(),
        style(&summary.service_name).bold(),
        format_status(summary.status),
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim(),
        summary.trigger,
        style(duration).cyan()
    )
}

/// Format a service event for display
pub fn format_service_event(event: &ServiceEvent) -> String {
    match event {
        ServiceEvent::HealthCheckPassed { service_name } => format!(
            "{} {} is healthy",
            CHECK,
            style(service_name).bold()
        ),
        ServiceEvent::RunStarted { run_id, trigger } => format!(
            "{} Run {} started ({})",
            ROCKET,
            style(short_id(&run_id.to_string())).dim(),
            trigger
        ),
        ServiceEvent::RunSucceeded { run_id, report } => format!(
            "{} Run {} {} in {}",
            CHECK,
            style(short_id(&run_id.to_string())).dim(),
            style("succeeded").green(),
            style(format_duration(report.duration)).cyan()
        ),
        ServiceEvent::RunFailed { run_id, error } => format!(
            "{} Run {} {}: {}",
            CROSS,
            style(short_id(&run_id.to_string())).dim(),
            style("failed").red(),
            style(error).dim()
        ),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
