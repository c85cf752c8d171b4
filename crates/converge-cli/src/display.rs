//! Display formatting for CLI output
//!
//! Renders deltas, sync outcomes, and health reports with console styling.

use console::{Style, style};

use converge_core::{Delta, OpKind, SyncOperation, SyncOutcome};
use converge_kube::{EnvironmentHealth, HealthState};

/// Print a delta, one styled line per operation
pub fn print_delta(delta: &Delta) {
    if delta.is_empty() {
        println!(
            "{} environment '{}' is in sync at {}",
            style("✓").green(),
            delta.environment,
            style(&delta.revision).cyan()
        );
        return;
    }

    println!(
        "{} for '{}' at {} ({})",
        style("DELTA").bold().underlined(),
        delta.environment,
        style(&delta.revision).cyan(),
        delta.summary()
    );
    for op in &delta.operations {
        let (sign, sign_style) = match &op.kind {
            OpKind::Create => ("+", Style::new().green()),
            OpKind::Update { .. } => ("~", Style::new().yellow()),
            OpKind::Delete => ("-", Style::new().red()),
        };
        println!("  {} {}", sign_style.apply_to(sign), op.id);
    }
}

/// Print a terminal sync operation
pub fn print_sync(operation: &SyncOperation) {
    let outcome = operation.outcome.as_ref();
    let status = match outcome {
        Some(SyncOutcome::Succeeded) => style("succeeded").green(),
        Some(SyncOutcome::Partial { .. }) => style("partial").yellow(),
        Some(SyncOutcome::Aborted { .. }) => style("aborted").yellow(),
        Some(SyncOutcome::Failed { .. }) => style("failed").red(),
        None => style("in flight").dim(),
    };

    println!("{}", style("SYNC").bold().underlined());
    println!("  Environment: {}", style(&operation.environment).cyan());
    println!("  Revision:    {}", style(&operation.revision).cyan());
    println!("  Policy:      {}", operation.policy);
    println!("  Trigger:     {}", operation.trigger);
    println!("  Outcome:     {}", status);
    if let Some(outcome) = outcome
        && !matches!(outcome, SyncOutcome::Succeeded)
    {
        println!("  Detail:      {}", outcome.cause());
    }
}

/// Print an environment health report
pub fn print_health(health: &EnvironmentHealth) {
    println!("{}", style("HEALTH").bold().underlined());
    println!("  State: {}", health_style(health.state));
    for resource in &health.resources {
        let icon = match resource.state {
            HealthState::Healthy => style("✓").green(),
            HealthState::Progressing => style("…").yellow(),
            HealthState::Degraded => style("✗").red(),
            HealthState::Unknown => style("?").dim(),
        };
        let message = resource
            .message
            .as_deref()
            .map(|m| format!(" - {}", style(m).dim()))
            .unwrap_or_default();
        println!(
            "  {} {} {}{}",
            icon,
            resource.id,
            resource.readiness_display(),
            message
        );
    }
}

/// Styled health state for tables and summaries
pub fn health_style(state: HealthState) -> console::StyledObject<String> {
    let text = state.to_string();
    match state {
        HealthState::Healthy => style(text).green(),
        HealthState::Progressing => style(text).yellow(),
        HealthState::Degraded => style(text).red(),
        HealthState::Unknown => style(text).dim(),
    }
}
