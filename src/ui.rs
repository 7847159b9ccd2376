//! Console output for runs.

use crate::metrics::RunTotals;
use crate::policy::{ProjectMode, RunMode};
use crate::registry::{Resolution, ToolSource};
use crate::runner::{RunReport, RunStatus, StepOutcome};
use console::style;

pub fn print_run_header(run_id: &str, policy: &ProjectMode, mode: RunMode) {
    println!(
        "{} {} (project: {}, mode: {}, security: {})",
        style("Run").bold(),
        style(run_id).cyan(),
        policy.project,
        mode,
        policy.security,
    );
    if policy.immutable {
        println!("  {}", style("immutable tenant policy in effect").yellow());
    }
}

/// One line per plan entry, shown for dry runs and `ctk registry`.
pub fn print_plan_entry(role: &str, resolution: &Resolution) {
    match resolution {
        Resolution::Process(tool) => {
            let source = match tool.source {
                ToolSource::Tenant => style("tenant").yellow(),
                ToolSource::Global => style("global").dim(),
            };
            println!("  {:<12} {} ({})", role, tool.path.display(), source);
        }
        Resolution::InProcess(_) => {
            println!("  {:<12} {}", role, style("in-process").cyan());
        }
    }
}

pub fn print_step_line(outcome: &StepOutcome) {
    let mark = if outcome.ok {
        style("ok").green()
    } else {
        style("failed").red()
    };
    let retry = if outcome.attempts > 1 { " (retried)" } else { "" };
    println!(
        "  {:<12} {} {:>6}ms{}  {}",
        outcome.role.to_string(),
        mark,
        outcome.elapsed_ms,
        retry,
        style(&outcome.gate.reason).dim(),
    );
}

pub fn print_run_summary(report: &RunReport, totals: &RunTotals) {
    let status = match report.status {
        RunStatus::Success => style("completed").green(),
        RunStatus::StepFailures => style("completed with failures").yellow(),
        RunStatus::Aborted => style("aborted").red(),
        RunStatus::HitlAborted => style("aborted by operator").red(),
    };
    println!("\n{} {}", style("Run").bold(), status);
    println!(
        "  {}",
        crate::metrics::format_summary(totals, report.wall)
    );
}
