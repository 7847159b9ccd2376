//! Run orchestration.
//!
//! `run_step` drives one step through its full state machine (resolve →
//! launch → security filter → gate → record, with one retry), against an
//! immutable baton snapshot. It returns the baton writes instead of
//! applying them, so the sequential runner can thread them step-by-step
//! while a parallel phase defers them to a deterministic merge.

pub mod hybrid;
pub mod pool;
pub mod sequential;

use crate::adapter::{self, StepEnv};
use crate::baton::Baton;
use crate::errors::OrchestratorError;
use crate::gates::{self, GateVerdict};
use crate::hitl::HitlGate;
use crate::launcher::TIMEOUT_EXIT_CODE;
use crate::metrics::{GateOutcome, MetricRecord, MetricsRecorder};
use crate::policy::{ProjectMode, SecurityProfile};
use crate::registry::{Role, ToolRegistry};
use crate::security::SecurityFilter;
use crate::settings::Settings;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Everything a step needs, shared across the whole run.
pub struct RunContext {
    pub run_id: String,
    pub policy: ProjectMode,
    /// Effective security profile (config may tighten the policy default).
    pub security: SecurityProfile,
    pub settings: Settings,
    pub registry: Arc<ToolRegistry>,
    pub metrics: Arc<MetricsRecorder>,
    pub filter: Arc<SecurityFilter>,
    pub hitl: Arc<HitlGate>,
    /// Retries permitted per step after the first attempt (0 or 1).
    pub retries: u32,
}

impl RunContext {
    /// Tags layered into each child's allow-listed environment. Tags are
    /// per-spawn; the orchestrator's own environment is never mutated.
    pub fn step_env(&self, parallel_phase: bool) -> StepEnv {
        let mut extra_env = BTreeMap::new();
        extra_env.insert("CTK_RUN_ID".to_string(), self.run_id.clone());
        extra_env.insert("CTK_PROJECT".to_string(), self.policy.project.clone());
        if self.policy.immutable {
            extra_env.insert("CTK_STRICT_MODE".to_string(), "1".to_string());
        }
        if parallel_phase {
            extra_env.insert("CTK_PARALLEL_PHASE".to_string(), "1".to_string());
        }
        StepEnv {
            extra_env,
            deadline: self.settings.tool_timeout,
            llm_wrap: self.settings.llm_wrap,
            parallel_phase,
            strict_mode: self.policy.immutable,
        }
    }
}

/// Monotonic-enough unique run id: UTC timestamp plus a random suffix.
pub fn new_run_id() -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{stamp}-{}", &suffix[..8])
}

/// Final outcome of one step (after any retry).
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub role: Role,
    pub ok: bool,
    pub security_violation: bool,
    /// Final attempt ended in an orchestrator-induced timeout.
    pub timed_out: bool,
    pub gate: GateVerdict,
    pub artifacts: Value,
    /// Attempts made (1 or 2).
    pub attempts: u32,
    pub elapsed_ms: u64,
    /// Baton writes from the final attempt, deferred to the caller.
    pub writes: Vec<(String, Value)>,
}

/// Drive one step to its final outcome against a baton snapshot.
pub async fn run_step(
    ctx: &RunContext,
    role: &Role,
    baton: &Baton,
    parallel_phase: bool,
) -> Result<StepOutcome, OrchestratorError> {
    let resolution = ctx.registry.resolve(role)?;
    let env = ctx.step_env(parallel_phase);
    let tenant_strict = ctx.policy.immutable;
    let max_attempts = 1 + ctx.retries;
    let mut attempt: u32 = 0;

    loop {
        let started = Instant::now();
        let result = adapter::execute(role, &resolution, baton, &env).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let timed_out = result.exit_code == Some(TIMEOUT_EXIT_CODE);

        let artifacts_value = result.artifacts_value();
        let mut security_violation = false;
        let verdict = match ctx.filter.check(&artifacts_value, ctx.security) {
            Ok(_) => gates::evaluate(role, result.artifacts.as_ref(), tenant_strict),
            Err(err) => {
                security_violation = true;
                GateVerdict {
                    accept: false,
                    reason: err.to_string(),
                }
            }
        };

        let ok = verdict.accept && !security_violation;
        ctx.metrics.record(&MetricRecord {
            run_id: ctx.run_id.clone(),
            timestamp: Utc::now(),
            project: ctx.policy.project.clone(),
            role: role.to_string(),
            elapsed_ms,
            tokens_in: result.tokens_in,
            tokens_out: result.tokens_out,
            tool_calls: result.tool_calls,
            ok,
            retries: attempt,
            gate: if ok {
                GateOutcome::Passed
            } else {
                GateOutcome::Failed
            },
        })?;

        if ok {
            tracing::info!(role = %role, attempt, "step passed");
            return Ok(StepOutcome {
                role: role.clone(),
                ok: true,
                security_violation: false,
                timed_out: false,
                writes: gates::baton_writes(role, &verdict, &artifacts_value),
                gate: verdict,
                artifacts: artifacts_value,
                attempts: attempt + 1,
                elapsed_ms,
            });
        }

        // Security violations never retry; everything else gets one more
        // attempt while the budget lasts.
        if security_violation || attempt + 1 >= max_attempts {
            tracing::warn!(role = %role, attempt, reason = %verdict.reason, "step failed");
            // On a security violation the offending artifacts stay out of
            // the baton; only the verdict is recorded.
            let (writes, artifacts) = if security_violation {
                (
                    vec![(gates::gate_key(role), verdict.to_value())],
                    Value::Null,
                )
            } else {
                (
                    gates::baton_writes(role, &verdict, &artifacts_value),
                    artifacts_value,
                )
            };
            return Ok(StepOutcome {
                role: role.clone(),
                ok: false,
                security_violation,
                timed_out,
                writes,
                gate: verdict,
                artifacts,
                attempts: attempt + 1,
                elapsed_ms,
            });
        }

        tracing::info!(role = %role, reason = %verdict.reason, "retrying step once");
        attempt += 1;
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every step passed.
    Success,
    /// At least one step failed; the run continued (non-strict profile).
    StepFailures,
    /// Strict profile aborted the run at the first final failure.
    Aborted,
    /// The operator aborted at a checkpoint. Supersedes step outcomes.
    HitlAborted,
}

/// Structured result of a whole run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub steps: Vec<StepOutcome>,
    pub baton: Baton,
    pub wall: Duration,
}

impl RunReport {
    /// Process exit code: 0 success, 1 failure, 2 operator abort, 124 for
    /// a fatal timeout.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Success => 0,
            RunStatus::HitlAborted => 2,
            RunStatus::Aborted => {
                if self.steps.last().map(|s| s.timed_out).unwrap_or(false) {
                    TIMEOUT_EXIT_CODE
                } else {
                    1
                }
            }
            RunStatus::StepFailures => 1,
        }
    }
}
