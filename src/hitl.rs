//! Human-in-the-loop approval gate.
//!
//! When enabled, the orchestrator blocks at each phase boundary (or at the
//! start of a sequential run) until the operator chooses to continue or
//! abort. For the immutable tenant the prompt never auto-approves: there
//! is no timeout path, only an explicit answer. Other tenants may arm an
//! auto-continue deadline.

use anyhow::{Context, Result};
use dialoguer::{Select, theme::ColorfulTheme};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Operator decision at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitlDecision {
    Continue,
    Abort,
}

/// What the operator sees before deciding.
#[derive(Debug, Clone)]
pub struct CheckpointSummary {
    pub phase: String,
    pub mode: String,
    pub agents: Vec<String>,
    pub baton_keys: Vec<String>,
}

/// Source of checkpoint decisions.
pub trait Approver: Send + Sync {
    fn decide(&self, summary: &CheckpointSummary) -> Result<HitlDecision>;
}

/// Interactive prompt on the operator's terminal.
pub struct TerminalApprover;

impl Approver for TerminalApprover {
    fn decide(&self, summary: &CheckpointSummary) -> Result<HitlDecision> {
        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Proceed with phase '{}'?", summary.phase))
            .items(&["Continue", "Abort run"])
            .default(0)
            .interact()
            .context("Failed to read operator decision")?;
        Ok(match selection {
            0 => HitlDecision::Continue,
            _ => HitlDecision::Abort,
        })
    }
}

/// Replays a fixed queue of decisions; once drained, continues. Used for
/// non-interactive environments and tests.
pub struct ScriptedApprover {
    decisions: Mutex<VecDeque<HitlDecision>>,
}

impl ScriptedApprover {
    pub fn new(decisions: impl IntoIterator<Item = HitlDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into_iter().collect()),
        }
    }
}

impl Approver for ScriptedApprover {
    fn decide(&self, _summary: &CheckpointSummary) -> Result<HitlDecision> {
        let mut queue = match self.decisions.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(queue.pop_front().unwrap_or(HitlDecision::Continue))
    }
}

/// The checkpoint itself.
pub struct HitlGate {
    enabled: bool,
    immutable: bool,
    timeout: Option<Duration>,
    approver: Arc<dyn Approver>,
}

impl HitlGate {
    pub fn new(
        enabled: bool,
        immutable: bool,
        timeout: Option<Duration>,
        approver: Arc<dyn Approver>,
    ) -> Self {
        Self {
            enabled,
            immutable,
            timeout,
            approver,
        }
    }

    /// A gate that always continues (HITL disabled).
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            immutable: false,
            timeout: None,
            approver: Arc::new(ScriptedApprover::new([])),
        }
    }

    /// Block until the operator decides. Immutable tenants get no
    /// timeout path; the approval must be explicit.
    pub async fn checkpoint(&self, summary: CheckpointSummary) -> Result<HitlDecision> {
        if !self.enabled {
            return Ok(HitlDecision::Continue);
        }

        print_summary(&summary);

        let approver = Arc::clone(&self.approver);
        let task = tokio::task::spawn_blocking(move || approver.decide(&summary));

        let decision = match (self.immutable, self.timeout) {
            (false, Some(timeout)) => match tokio::time::timeout(timeout, task).await {
                Ok(joined) => joined.context("Approver task failed")??,
                Err(_) => {
                    // The abandoned prompt thread ends with the process.
                    tracing::info!(
                        timeout_ms = timeout.as_millis() as u64,
                        "checkpoint timed out, auto-continuing"
                    );
                    HitlDecision::Continue
                }
            },
            _ => task.await.context("Approver task failed")??,
        };

        if decision == HitlDecision::Abort {
            tracing::warn!("operator aborted run at checkpoint");
        }
        Ok(decision)
    }
}

fn print_summary(summary: &CheckpointSummary) {
    println!(
        "\n{} {} ({})",
        console::style("Checkpoint:").bold(),
        console::style(&summary.phase).cyan(),
        summary.mode,
    );
    println!("  agents: {}", summary.agents.join(", "));
    if !summary.baton_keys.is_empty() {
        println!("  baton:  {}", summary.baton_keys.join(", "));
    }
}
