//! Typed per-role artifact shapes.
//!
//! Each role's adapter normalizes tool output into one of these variants;
//! gates pattern-match on them exhaustively. `to_value` produces the JSON
//! written into the baton and scanned by the security filter. JSON field
//! names follow the wire contract of the tools (`saved`, `success`, `ok`,
//! `issues`, `testsPassed`, `audit`, `redacted`).

use serde_json::{Map, Value, json};

/// Bytes of stdout preserved in a redacted preview.
pub const PREVIEW_BYTES: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub enum Artifacts {
    /// `memory` — did the tool persist its payload. `strict_mode` mirrors
    /// the run's strict tag so the tenant-strict gate stays a pure
    /// predicate over artifacts.
    Memory { saved: bool, strict_mode: bool },
    /// `sql` — the tool's own JSON object, `success` forced from the exit
    /// code on the process path.
    Sql { payload: Map<String, Value> },
    /// `validation` — verdict plus a list of issue strings.
    Validation { ok: bool, issues: Vec<String> },
    /// `qa` — overall verdict, with optional per-test counts when the tool
    /// reports them.
    Qa {
        tests_passed: bool,
        passed: Option<u64>,
        failed: Option<u64>,
    },
    /// `security` — audit happened, with an optional reported issue count.
    Security {
        audit: bool,
        ok: bool,
        issues: Option<u64>,
    },
    /// `env` — the tool's own JSON object (same wire shape as `sql`).
    Env { payload: Map<String, Value> },
    /// Substituted whenever a JSON-expecting adapter could not parse
    /// stdout. Never carries the full captured output.
    Redacted {
        exit_code: i32,
        stdout_preview: String,
        stdout_bytes: usize,
        success: bool,
    },
    /// Unknown-role output, passed through untouched.
    Opaque(Value),
}

impl Artifacts {
    /// Build a redacted preview from raw stdout. The preview is truncated
    /// at a UTF-8 boundary at or below [`PREVIEW_BYTES`].
    pub fn redacted(exit_code: i32, stdout: &str) -> Self {
        let mut end = stdout.len().min(PREVIEW_BYTES);
        while end > 0 && !stdout.is_char_boundary(end) {
            end -= 1;
        }
        Artifacts::Redacted {
            exit_code,
            stdout_preview: stdout[..end].to_string(),
            stdout_bytes: stdout.len(),
            success: exit_code == 0,
        }
    }

    /// The JSON value written into the baton and fed to the security filter.
    pub fn to_value(&self) -> Value {
        match self {
            Artifacts::Memory { saved, strict_mode } => {
                let mut obj = json!({ "saved": saved });
                if *strict_mode {
                    obj["strict_mode"] = json!(true);
                }
                obj
            }
            Artifacts::Sql { payload } | Artifacts::Env { payload } => {
                Value::Object(payload.clone())
            }
            Artifacts::Validation { ok, issues } => json!({ "ok": ok, "issues": issues }),
            Artifacts::Qa {
                tests_passed,
                passed,
                failed,
            } => {
                let mut obj = json!({ "testsPassed": tests_passed });
                if let Some(p) = passed {
                    obj["passed"] = json!(p);
                }
                if let Some(f) = failed {
                    obj["failed"] = json!(f);
                }
                obj
            }
            Artifacts::Security { audit, ok, issues } => {
                let mut obj = json!({ "audit": audit, "ok": ok });
                if let Some(n) = issues {
                    obj["issues"] = json!(n);
                }
                obj
            }
            Artifacts::Redacted {
                exit_code,
                stdout_preview,
                stdout_bytes,
                success,
            } => json!({
                "exitCode": exit_code,
                "stdout_preview": stdout_preview,
                "stdout_bytes": stdout_bytes,
                "redacted": true,
                "success": success,
            }),
            Artifacts::Opaque(value) => value.clone(),
        }
    }
}

/// Normalized result of one step attempt. `artifacts` is the only field
/// the gates inspect; `None` means the tool produced nothing usable and
/// gates fail closed. `exit_code` is carried for exit-status propagation
/// only (the in-process path has none).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepResult {
    pub artifacts: Option<Artifacts>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub tool_calls: u64,
    pub exit_code: Option<i32>,
}

impl StepResult {
    pub fn with_artifacts(artifacts: Artifacts) -> Self {
        Self {
            artifacts: Some(artifacts),
            ..Default::default()
        }
    }

    pub fn artifacts_value(&self) -> Value {
        self.artifacts
            .as_ref()
            .map(Artifacts::to_value)
            .unwrap_or(Value::Null)
    }
}
