//! Sequential runner.
//!
//! Executes steps strictly in order, threading the baton so step `i+1`
//! observes every write of step `i`. Under the strict security profile the
//! run aborts at the first step that exhausts its retry; otherwise
//! failures are recorded and the chain continues.

use super::{RunContext, RunReport, RunStatus, run_step};
use crate::baton::Baton;
use crate::errors::OrchestratorError;
use crate::hitl::{CheckpointSummary, HitlDecision};
use crate::registry::Role;
use std::time::Instant;

pub async fn run(
    ctx: &RunContext,
    agents: &[Role],
    initial: Baton,
) -> Result<RunReport, OrchestratorError> {
    let started = Instant::now();

    let decision = ctx
        .hitl
        .checkpoint(CheckpointSummary {
            phase: "run".to_string(),
            mode: "sequential".to_string(),
            agents: agents.iter().map(Role::to_string).collect(),
            baton_keys: initial.keys().cloned().collect(),
        })
        .await?;
    if decision == HitlDecision::Abort {
        return Ok(RunReport {
            run_id: ctx.run_id.clone(),
            status: RunStatus::HitlAborted,
            steps: Vec::new(),
            baton: initial,
            wall: started.elapsed(),
        });
    }

    let mut baton = initial;
    let mut steps = Vec::new();
    let mut status = RunStatus::Success;

    for role in agents {
        tracing::info!(role = %role, "starting step");
        let outcome = run_step(ctx, role, &baton, false).await?;
        baton.apply(outcome.writes.clone());
        let failed = !outcome.ok;
        steps.push(outcome);

        if failed {
            if ctx.security.is_strict() {
                status = RunStatus::Aborted;
                tracing::error!(role = %role, "aborting run (strict security)");
                break;
            }
            status = RunStatus::StepFailures;
        }
    }

    Ok(RunReport {
        run_id: ctx.run_id.clone(),
        status,
        steps,
        baton,
        wall: started.elapsed(),
    })
}
