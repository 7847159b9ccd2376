//! Acceptance gates: pure predicates over step artifacts.
//!
//! Each role has a baseline rule and, for the immutable tenant, a strict
//! variant. Which variant applies is a function of the run's
//! `ProjectMode`, passed in as `tenant_strict`; gates never consult
//! global state. Missing artifacts and unexpected shapes fail closed.
//! Unknown roles pass by default, logged.

use crate::artifacts::{Artifacts, StepResult};
use crate::baton::Baton;
use crate::registry::Role;
use serde_json::{Value, json};

/// Outcome of one gate evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct GateVerdict {
    pub accept: bool,
    pub reason: String,
}

impl GateVerdict {
    fn accept(reason: impl Into<String>) -> Self {
        Self {
            accept: true,
            reason: reason.into(),
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            accept: false,
            reason: reason.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({ "accept": self.accept, "reason": self.reason })
    }
}

/// Evaluate a role's gate against its artifacts.
pub fn evaluate(role: &Role, artifacts: Option<&Artifacts>, tenant_strict: bool) -> GateVerdict {
    let Some(artifacts) = artifacts else {
        return GateVerdict::reject(format!("{role}: no artifacts produced"));
    };

    match (role, artifacts) {
        (Role::Memory, Artifacts::Memory { saved, strict_mode }) => {
            if !saved {
                GateVerdict::reject("memory: artifacts not saved")
            } else if tenant_strict && !strict_mode {
                GateVerdict::reject("memory: strict-mode tag missing")
            } else {
                GateVerdict::accept("memory: saved")
            }
        }

        (Role::Sql, Artifacts::Sql { payload }) => {
            if payload.get("success") == Some(&Value::Bool(false)) {
                GateVerdict::reject("sql: tool reported success=false")
            } else {
                GateVerdict::accept("sql: success")
            }
        }
        (Role::Sql | Role::Env, Artifacts::Redacted { success, .. }) => {
            if *success {
                GateVerdict::accept(format!("{role}: exit ok (output redacted)"))
            } else {
                GateVerdict::reject(format!("{role}: tool failed (output redacted)"))
            }
        }

        (Role::Validation, Artifacts::Validation { ok, issues }) => {
            if tenant_strict
                && issues
                    .iter()
                    .any(|issue| issue.contains("ERROR") || issue.contains("FAIL"))
            {
                return GateVerdict::reject("validation: issue list contains ERROR/FAIL");
            }
            // Baseline accepts `ok` or any well-formed issue list.
            if *ok {
                GateVerdict::accept("validation: ok")
            } else {
                GateVerdict::accept(format!("validation: {} issue(s) recorded", issues.len()))
            }
        }

        (
            Role::Qa,
            Artifacts::Qa {
                tests_passed,
                passed,
                failed,
            },
        ) => {
            if !tests_passed {
                return GateVerdict::reject("qa: tests failed");
            }
            if tenant_strict {
                if let (Some(passed), Some(failed)) = (passed, failed) {
                    let total = passed + failed;
                    if total > 0 && (*passed as f64) / (total as f64) < 0.8 {
                        return GateVerdict::reject(format!(
                            "qa: pass rate {passed}/{total} below 80%"
                        ));
                    }
                }
            }
            GateVerdict::accept("qa: tests passed")
        }

        (Role::Security, Artifacts::Security { audit, ok, issues }) => {
            if !audit && !ok {
                return GateVerdict::reject("security: audit did not run");
            }
            let reported = issues.unwrap_or(0);
            if tenant_strict && reported > 0 {
                return GateVerdict::reject(format!("security: {reported} issue(s) reported"));
            }
            GateVerdict::accept("security: audit ok")
        }

        (Role::Env, Artifacts::Env { payload }) => {
            if payload.get("ok") == Some(&Value::Bool(false)) {
                return GateVerdict::reject("env: tool reported ok=false");
            }
            if tenant_strict {
                let missing = payload
                    .get("missing")
                    .and_then(Value::as_array)
                    .map(|a| a.len())
                    .unwrap_or(0);
                if missing > 0 {
                    return GateVerdict::reject(format!(
                        "env: {missing} required key(s) missing"
                    ));
                }
            }
            GateVerdict::accept("env: ok")
        }

        (Role::Other(name), _) => {
            tracing::warn!(role = %name, "no gate registered for role, accepting by default");
            GateVerdict::accept(format!("{name}: no gate registered, accepted"))
        }

        // Any other (role, shape) pairing is a normalization bug upstream.
        (role, other) => GateVerdict::reject(format!(
            "{role}: unexpected artifact shape {}",
            shape_name(other)
        )),
    }
}

fn shape_name(artifacts: &Artifacts) -> &'static str {
    match artifacts {
        Artifacts::Memory { .. } => "memory",
        Artifacts::Sql { .. } => "sql",
        Artifacts::Validation { .. } => "validation",
        Artifacts::Qa { .. } => "qa",
        Artifacts::Security { .. } => "security",
        Artifacts::Env { .. } => "env",
        Artifacts::Redacted { .. } => "redacted",
        Artifacts::Opaque(_) => "opaque",
    }
}

pub fn gate_key(role: &Role) -> String {
    format!("{role}_gate")
}

pub fn artifacts_key(role: &Role) -> String {
    format!("{role}_artifacts")
}

/// Apply a gate: evaluate, then record `<role>_gate` and
/// `<role>_artifacts` in the baton regardless of verdict (downstream
/// steps can introspect failures), plus `<role>` itself on acceptance.
pub fn apply(role: &Role, result: &StepResult, baton: &mut Baton, tenant_strict: bool) -> GateVerdict {
    let verdict = evaluate(role, result.artifacts.as_ref(), tenant_strict);
    baton.apply(baton_writes(role, &verdict, &result.artifacts_value()));
    verdict
}

/// The writes `apply` performs, exposed separately so parallel workers
/// can defer them to the phase merge.
pub fn baton_writes(
    role: &Role,
    verdict: &GateVerdict,
    artifacts_value: &Value,
) -> Vec<(String, Value)> {
    let mut writes = vec![
        (gate_key(role), verdict.to_value()),
        (artifacts_key(role), artifacts_value.clone()),
    ];
    if verdict.accept {
        writes.push((role.to_string(), artifacts_value.clone()));
    }
    writes
}
