//! Adapter layer: per-role result normalization.
//!
//! Every role has exactly one normal form (see `artifacts`). Two execution
//! strategies feed it: the subprocess path through the launcher (always
//! available) and an in-process path for tools registered as
//! [`InProcessTool`]. The strategy is decided by the registry at
//! resolution time, never probed here.

pub mod telemetry;

use crate::artifacts::{Artifacts, StepResult};
use crate::baton::Baton;
use crate::launcher::{self, LaunchOutput, LaunchSpec};
use crate::registry::{Resolution, Role};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// A tool implementation that runs inside the orchestrator process.
#[async_trait]
pub trait InProcessTool: Send + Sync {
    /// Invoke the tool with the current baton. The returned value is
    /// normalized by the role's adapter exactly like subprocess output.
    async fn invoke(&self, baton: &Baton) -> anyhow::Result<Value>;
}

/// Per-step execution context the adapter needs.
#[derive(Debug, Clone)]
pub struct StepEnv {
    /// Tags layered onto the launcher's env allow-list.
    pub extra_env: BTreeMap<String, String>,
    pub deadline: Duration,
    /// Token-telemetry parsing enabled.
    pub llm_wrap: bool,
    /// Telemetry is structurally disabled inside a parallel phase.
    pub parallel_phase: bool,
    /// The run carries the strict-mode tag (immutable tenant).
    pub strict_mode: bool,
}

/// Execute one step attempt and normalize its output.
pub async fn execute(
    role: &Role,
    resolution: &Resolution,
    baton: &Baton,
    env: &StepEnv,
) -> StepResult {
    match resolution {
        Resolution::Process(tool) => {
            let spec = LaunchSpec {
                path: tool.path.clone(),
                args: Vec::new(),
                extra_env: env.extra_env.clone(),
                deadline: env.deadline,
                cwd: None,
            };
            let output = launcher::run(&spec).await;
            normalize_process(role, &output, env)
        }
        Resolution::InProcess(tool) => match tool.invoke(baton).await {
            Ok(value) => StepResult {
                artifacts: normalize_value(role, value, env),
                ..Default::default()
            },
            Err(err) => {
                tracing::warn!(role = %role, error = %err, "in-process tool failed");
                StepResult::default()
            }
        },
    }
}

/// Normalize a subprocess result into the role's artifact shape.
pub fn normalize_process(role: &Role, output: &LaunchOutput, env: &StepEnv) -> StepResult {
    let success = output.exit_code == 0;
    let artifacts = match role {
        Role::Memory => Artifacts::Memory {
            saved: success,
            strict_mode: env.strict_mode,
        },
        Role::Sql | Role::Env => json_payload(role, output),
        Role::Validation => Artifacts::Validation {
            ok: success,
            issues: if output.stderr.trim().is_empty() {
                Vec::new()
            } else {
                vec![output.stderr.trim().to_string()]
            },
        },
        Role::Qa => {
            let counts = parse_object(&output.stdout);
            Artifacts::Qa {
                tests_passed: success,
                passed: counts
                    .as_ref()
                    .and_then(|o| o.get("passed"))
                    .and_then(Value::as_u64),
                failed: counts
                    .as_ref()
                    .and_then(|o| o.get("failed"))
                    .and_then(Value::as_u64),
            }
        }
        Role::Security => Artifacts::Security {
            audit: true,
            ok: success,
            issues: parse_object(&output.stdout)
                .as_ref()
                .and_then(|o| o.get("issues"))
                .and_then(issue_count),
        },
        Role::Other(_) => Artifacts::Opaque(serde_json::json!({ "exitCode": output.exit_code })),
    };

    let telemetry = if env.llm_wrap && !env.parallel_phase {
        telemetry::parse_streams(&output.stdout, &output.stderr)
    } else {
        telemetry::Telemetry::default()
    };

    StepResult {
        artifacts: Some(artifacts),
        tokens_in: telemetry.tokens_in,
        tokens_out: telemetry.tokens_out,
        tool_calls: telemetry.tool_calls,
        exit_code: Some(output.exit_code),
    }
}

/// JSON-expecting roles: a parsed stdout object becomes the payload with
/// `success` forced from the exit code; anything else becomes a redacted
/// preview. The full stdout never reaches the artifacts.
fn json_payload(role: &Role, output: &LaunchOutput) -> Artifacts {
    let success = output.exit_code == 0;
    match parse_object(&output.stdout) {
        Some(mut payload) => {
            payload.insert("success".to_string(), Value::Bool(success));
            match role {
                Role::Env => Artifacts::Env { payload },
                _ => Artifacts::Sql { payload },
            }
        }
        None => Artifacts::redacted(output.exit_code, &output.stdout),
    }
}

/// Normalize an in-process tool's return value.
fn normalize_value(role: &Role, value: Value, env: &StepEnv) -> Option<Artifacts> {
    if value.is_null() {
        return None;
    }
    let artifacts = match role {
        Role::Memory => {
            let saved = value
                .as_bool()
                .or_else(|| value.get("saved").and_then(Value::as_bool))
                .unwrap_or(false);
            Artifacts::Memory {
                saved,
                strict_mode: env.strict_mode,
            }
        }
        Role::Sql | Role::Env => match value {
            Value::Object(payload) => match role {
                Role::Env => Artifacts::Env { payload },
                _ => Artifacts::Sql { payload },
            },
            other => Artifacts::Opaque(other),
        },
        Role::Validation => Artifacts::Validation {
            ok: value.get("ok").and_then(Value::as_bool).unwrap_or(false),
            issues: value
                .get("issues")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        },
        Role::Qa => Artifacts::Qa {
            tests_passed: value
                .get("testsPassed")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            passed: value.get("passed").and_then(Value::as_u64),
            failed: value.get("failed").and_then(Value::as_u64),
        },
        Role::Security => Artifacts::Security {
            audit: value.get("audit").and_then(Value::as_bool).unwrap_or(false),
            ok: value.get("ok").and_then(Value::as_bool).unwrap_or(false),
            issues: value.get("issues").and_then(issue_count),
        },
        Role::Other(_) => Artifacts::Opaque(value),
    };
    Some(artifacts)
}

fn parse_object(stdout: &str) -> Option<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(stdout.trim()) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

/// Reported issues may arrive as a count or as a list.
fn issue_count(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_array().map(|a| a.len() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env() -> StepEnv {
        StepEnv {
            extra_env: BTreeMap::new(),
            deadline: Duration::from_secs(1),
            llm_wrap: false,
            parallel_phase: false,
            strict_mode: false,
        }
    }

    fn launch(exit_code: i32, stdout: &str, stderr: &str) -> LaunchOutput {
        LaunchOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_memory_maps_exit_code_to_saved() {
        let ok = normalize_process(&Role::Memory, &launch(0, "", ""), &env());
        assert_eq!(
            ok.artifacts,
            Some(Artifacts::Memory {
                saved: true,
                strict_mode: false
            })
        );

        let bad = normalize_process(&Role::Memory, &launch(1, "", ""), &env());
        assert_eq!(
            bad.artifacts,
            Some(Artifacts::Memory {
                saved: false,
                strict_mode: false
            })
        );
    }

    #[test]
    fn test_sql_parses_json_and_forces_success() {
        // Tool claims success but exited non-zero: exit code wins.
        let out = launch(1, r#"{"rows": 3, "success": true}"#, "");
        let result = normalize_process(&Role::Sql, &out, &env());
        match result.artifacts.unwrap() {
            Artifacts::Sql { payload } => {
                assert_eq!(payload["rows"], json!(3));
                assert_eq!(payload["success"], json!(false));
            }
            other => panic!("expected Sql, got {other:?}"),
        }
    }

    #[test]
    fn test_sql_unparseable_stdout_is_redacted() {
        let noise = "MIGRATION LOG\n".repeat(100);
        let out = launch(0, &noise, "");
        let result = normalize_process(&Role::Sql, &out, &env());
        match result.artifacts.unwrap() {
            Artifacts::Redacted {
                stdout_preview,
                stdout_bytes,
                success,
                ..
            } => {
                assert!(stdout_preview.len() <= crate::artifacts::PREVIEW_BYTES);
                assert_eq!(stdout_bytes, noise.len());
                assert!(success);
            }
            other => panic!("expected Redacted, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_collects_stderr_issue() {
        let out = launch(2, "", "schema mismatch in users\n");
        let result = normalize_process(&Role::Validation, &out, &env());
        assert_eq!(
            result.artifacts,
            Some(Artifacts::Validation {
                ok: false,
                issues: vec!["schema mismatch in users".to_string()],
            })
        );

        let clean = normalize_process(&Role::Validation, &launch(0, "", ""), &env());
        assert_eq!(
            clean.artifacts,
            Some(Artifacts::Validation {
                ok: true,
                issues: vec![],
            })
        );
    }

    #[test]
    fn test_qa_reads_optional_counts() {
        let out = launch(0, r#"{"passed": 18, "failed": 2}"#, "");
        let result = normalize_process(&Role::Qa, &out, &env());
        assert_eq!(
            result.artifacts,
            Some(Artifacts::Qa {
                tests_passed: true,
                passed: Some(18),
                failed: Some(2),
            })
        );
    }

    #[test]
    fn test_security_counts_issue_list() {
        let out = launch(0, r#"{"issues": ["a", "b"]}"#, "");
        let result = normalize_process(&Role::Security, &out, &env());
        assert_eq!(
            result.artifacts,
            Some(Artifacts::Security {
                audit: true,
                ok: true,
                issues: Some(2),
            })
        );
    }

    #[test]
    fn test_telemetry_only_outside_parallel_phase() {
        let stdout = "{\"llm_tokens_in\": 10, \"llm_tokens_out\": 4}\n";
        let out = launch(0, stdout, "");

        let mut enabled = env();
        enabled.llm_wrap = true;
        let result = normalize_process(&Role::Memory, &out, &enabled);
        assert_eq!(result.tokens_in, 10);
        assert_eq!(result.tokens_out, 4);
        assert_eq!(result.tool_calls, 1);

        let mut parallel = enabled.clone();
        parallel.parallel_phase = true;
        let result = normalize_process(&Role::Memory, &out, &parallel);
        assert_eq!(result.tokens_in, 0);
        assert_eq!(result.tokens_out, 0);
        assert_eq!(result.tool_calls, 0);
    }

    #[tokio::test]
    async fn test_in_process_strategy_normalizes_like_subprocess() {
        struct FakeMemory;

        #[async_trait]
        impl InProcessTool for FakeMemory {
            async fn invoke(&self, _baton: &Baton) -> anyhow::Result<Value> {
                Ok(json!({"saved": true}))
            }
        }

        let resolution = Resolution::InProcess(std::sync::Arc::new(FakeMemory));
        let result = execute(&Role::Memory, &resolution, &Baton::new(), &env()).await;
        assert_eq!(
            result.artifacts,
            Some(Artifacts::Memory {
                saved: true,
                strict_mode: false
            })
        );
    }

    #[tokio::test]
    async fn test_in_process_null_return_yields_no_artifacts() {
        struct NullTool;

        #[async_trait]
        impl InProcessTool for NullTool {
            async fn invoke(&self, _baton: &Baton) -> anyhow::Result<Value> {
                Ok(Value::Null)
            }
        }

        let resolution = Resolution::InProcess(std::sync::Arc::new(NullTool));
        let result = execute(&Role::Qa, &resolution, &Baton::new(), &env()).await;
        assert!(result.artifacts.is_none());
    }
}
