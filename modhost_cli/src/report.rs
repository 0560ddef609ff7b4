//! Formatting utilities for the simulation output.

use std::fmt::Write;
use std::time::Duration;

use modhost_core::{PluginSnapshot, PluginStatus, RuntimeReport};
use serde::Serialize;

/// Everything a simulation run produces.
#[derive(Debug, Serialize)]
pub struct SimulationOutput {
    pub run_ms: u64,
    /// Failures forwarded to the error sink.
    pub errors_reported: usize,
    /// State and plugins captured while the session was live.
    pub running: RuntimeReport,
    /// State after the host deactivated the runtime.
    pub stopped: RuntimeReport,
}

/// Format a plugin status for a fixed-width column
pub fn format_status(status: PluginStatus) -> &'static str {
    match status {
        PluginStatus::NotActivated => "not activated",
        PluginStatus::Active => "active",
        PluginStatus::Deactivated => "deactivated",
    }
}

/// Format a duration for display
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis >= 1000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        format!("{}ms", millis)
    }
}

fn plugin_line(plugin: &PluginSnapshot) -> String {
    let order = plugin
        .activation_seq
        .map(|seq| format!("#{}", seq))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "  {:<24} {:<12} {:>8}  {:<14} {}{}",
        plugin.name,
        plugin.module.as_str(),
        plugin.priority,
        format_status(plugin.status),
        order,
        if plugin.provides_menu { "" } else { "  (no menu)" }
    )
}

/// Render the output as plain text.
pub fn render(output: &SimulationOutput) -> String {
    let running = &output.running;
    let mut text = String::new();

    let ran_for = format_duration(Duration::from_millis(output.run_ms));
    let _ = writeln!(text, "Simulation ran for {}", ran_for);
    let _ = writeln!(text, "State while running: {}", running.state);
    match &running.session {
        Some(session) => {
            let _ = writeln!(
                text,
                "Session: {} (owner {}, since {})",
                session.id, session.owner, session.created_at
            );
        }
        None => {
            let _ = writeln!(text, "Session: none");
        }
    }
    let _ = writeln!(
        text,
        "Bootstrap attempts: {}, sessions started: {}",
        running.bootstrap_attempts, running.sessions_started
    );
    if let Some(error) = &running.last_error {
        let _ = writeln!(text, "Last bootstrap error: {}", error);
    }

    let _ = writeln!(text, "\nPlugins:");
    if running.plugins.is_empty() {
        let _ = writeln!(text, "  (none discovered)");
    }
    for plugin in &running.plugins {
        let _ = writeln!(text, "{}", plugin_line(plugin));
    }

    if !running.excluded.is_empty() {
        let _ = writeln!(text, "\nExcluded as incompatible:");
        for key in &running.excluded {
            let _ = writeln!(text, "  {}", key);
        }
    }

    let stopped = &output.stopped;
    let _ = writeln!(text, "\nState after shutdown: {}", stopped.state);
    if stopped.deactivation_order.is_empty() {
        let _ = writeln!(text, "Deactivation order: (nothing was active)");
    } else {
        let order: Vec<String> =
            stopped.deactivation_order.iter().map(|key| key.to_string()).collect();
        let _ = writeln!(text, "Deactivation order: {}", order.join(" -> "));
    }
    let _ = writeln!(text, "Errors reported: {}", output.errors_reported);
    text
}
