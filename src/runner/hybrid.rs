//! Hybrid runner.
//!
//! Executes an ordered sequence of phases, each internally sequential or
//! parallel-with-bounded-concurrency. Refuses outright for the immutable
//! tenant, before any step starts. Parallel workers observe only the
//! phase-entry baton snapshot; their writes are merged deterministically
//! in phase-config order once the whole phase settles (drain-then-stop).

use super::pool::WorkerPool;
use super::{RunContext, RunReport, RunStatus, StepOutcome, run_step};
use crate::baton::Baton;
use crate::config::{PhaseConfig, PhaseMode};
use crate::errors::OrchestratorError;
use crate::hitl::{CheckpointSummary, HitlDecision};
use crate::registry::Role;
use futures::future::join_all;
use std::time::Instant;

pub async fn run(
    ctx: &RunContext,
    phases: &[PhaseConfig],
    initial: Baton,
) -> Result<RunReport, OrchestratorError> {
    if ctx.policy.immutable {
        return Err(OrchestratorError::ForbiddenTopology {
            project: ctx.policy.project.clone(),
        });
    }

    let started = Instant::now();
    let pool = WorkerPool::new(ctx.settings.max_parallel);
    let mut baton = initial;
    let mut steps: Vec<StepOutcome> = Vec::new();
    let mut status = RunStatus::Success;

    'phases: for phase in phases {
        let decision = ctx
            .hitl
            .checkpoint(CheckpointSummary {
                phase: phase.name.clone(),
                mode: phase.mode.to_string(),
                agents: phase.agents.clone(),
                baton_keys: baton.keys().cloned().collect(),
            })
            .await?;
        if decision == HitlDecision::Abort {
            status = RunStatus::HitlAborted;
            break;
        }

        tracing::info!(phase = %phase.name, mode = %phase.mode, "starting phase");

        match phase.mode {
            PhaseMode::Sequential => {
                for name in &phase.agents {
                    let role = Role::from(name.as_str());
                    let outcome = run_step(ctx, &role, &baton, false).await?;
                    baton.apply(outcome.writes.clone());
                    let failed = !outcome.ok;
                    steps.push(outcome);
                    if failed {
                        if ctx.security.is_strict() {
                            status = RunStatus::Aborted;
                            break 'phases;
                        }
                        status = RunStatus::StepFailures;
                    }
                }
            }
            PhaseMode::Parallel => {
                let snapshot = baton.snapshot();
                let futures = phase.agents.iter().map(|name| {
                    let role = Role::from(name.as_str());
                    let pool = &pool;
                    let snapshot = &snapshot;
                    async move {
                        let _permit = pool.acquire().await?;
                        run_step(ctx, &role, snapshot, true).await
                    }
                });
                // join_all drains the whole phase before any verdict is
                // acted on, and preserves phase-config order for the merge.
                let results = join_all(futures).await;

                let mut phase_failed = false;
                for result in results {
                    let outcome = result?;
                    baton.apply(outcome.writes.clone());
                    if !outcome.ok {
                        phase_failed = true;
                    }
                    steps.push(outcome);
                }

                if phase_failed {
                    if ctx.security.is_strict() {
                        status = RunStatus::Aborted;
                        break 'phases;
                    }
                    status = RunStatus::StepFailures;
                }
            }
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
