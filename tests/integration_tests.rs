//! Integration tests for the ctk orchestrator.
//!
//! Each scenario builds a throwaway project directory with a run config
//! and real shell-script tools, then drives the binary end to end.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Helper to create a ctk Command with a clean CTK_* environment.
fn ctk(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("ctk");
    cmd.arg("--project-dir").arg(dir.path());
    for var in [
        "CTK_PROJECT",
        "CTK_HITL",
        "CTK_LLM_WRAP",
        "CTK_MAX_PARALLEL",
        "CTK_TOOL_TIMEOUT_MS",
        "CTK_APPROVED",
        "CTK_HITL_TIMEOUT_MS",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Write an executable tool script and return its absolute path.
fn write_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

fn write_config(dir: &TempDir, content: &str) {
    fs::write(dir.path().join("ctk.toml"), content).unwrap();
}

/// Read the single run journal produced under `.ctk/metrics/runs/`.
fn read_journal(dir: &TempDir) -> Vec<serde_json::Value> {
    let runs_dir = dir.path().join(".ctk/metrics/runs");
    let mut files: Vec<PathBuf> = fs::read_dir(&runs_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    assert_eq!(files.len(), 1, "expected exactly one run journal");
    let content = fs::read_to_string(files.remove(0)).unwrap();
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

// =============================================================================
// Basic CLI
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        cargo_bin_cmd!("ctk").arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        cargo_bin_cmd!("ctk").arg("--version").assert().success();
    }

    #[test]
    fn test_orchestrate_without_config_fails() {
        let dir = create_temp_project();
        ctk(&dir)
            .arg("orchestrate")
            .assert()
            .failure()
            .stderr(predicate::str::contains("No run config found"));
    }
}

// =============================================================================
// Config validation
// =============================================================================

mod validation {
    use super::*;

    #[test]
    fn test_validate_accepts_good_config() {
        let dir = create_temp_project();
        write_config(&dir, "project = \"analytics\"\nagents = [\"memory\"]\n");
        ctk(&dir)
            .arg("validate")
            .assert()
            .success()
            .stdout(predicate::str::contains("ok:"));
    }

    #[test]
    fn test_validate_is_idempotent() {
        let dir = create_temp_project();
        write_config(&dir, "project = \"analytics\"\nagents = [\"memory\"]\n");
        ctk(&dir).arg("validate").assert().success();
        ctk(&dir).arg("validate").assert().success();
    }

    #[test]
    fn test_validate_rejects_unknown_key() {
        let dir = create_temp_project();
        write_config(&dir, "agnets = [\"memory\"]\n");
        ctk(&dir)
            .arg("validate")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("agnets"));
    }

    #[test]
    fn test_immutable_tenant_rejects_hybrid_config() {
        // S2 at the CLI surface: the validator stops a THR hybrid run
        // before the runner ever sees it.
        let dir = create_temp_project();
        write_config(
            &dir,
            r#"
project = "THR"
mode = "hybrid"

[[phases]]
name = "p"
mode = "parallel"
agents = ["memory"]
"#,
        );
        ctk(&dir)
            .arg("orchestrate")
            .env("CTK_APPROVED", "1")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("immutable"));
        assert!(
            !dir.path().join(".ctk/metrics").exists(),
            "no metrics may be written"
        );
    }
}

// =============================================================================
// Sequential runs
// =============================================================================

mod sequential_runs {
    use super::*;

    #[test]
    fn test_strict_tenant_sequential_success() {
        let dir = create_temp_project();
        let memory = write_tool(dir.path(), "memory.sh", "echo '{\"saved\":true}'\nexit 0\n");
        let validation = write_tool(dir.path(), "validation.sh", "exit 0\n");
        let qa = write_tool(
            dir.path(),
            "qa.sh",
            "echo '{\"testsPassed\":true}'\nexit 0\n",
        );
        write_config(
            &dir,
            &format!(
                r#"
project = "THR"
mode = "sequential"
security = "strict"
agents = ["memory", "validation", "qa"]

[tools.memory]
tenant = "{}"

[tools.validation]
tenant = "{}"

[tools.qa]
tenant = "{}"
"#,
                memory.display(),
                validation.display(),
                qa.display()
            ),
        );

        ctk(&dir)
            .arg("orchestrate")
            .env("CTK_APPROVED", "1")
            .assert()
            .success();

        let records = read_journal(&dir);
        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record["ok"], true);
            assert_eq!(record["gate"], "passed");
            assert_eq!(record["retries"], 0);
            assert_eq!(record["project"], "THR");
        }
        let roles: Vec<&str> = records.iter().map(|r| r["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["memory", "validation", "qa"]);
    }

    #[test]
    fn test_timeout_then_retry_then_success() {
        let dir = create_temp_project();
        let marker = dir.path().join("attempted");
        let qa = write_tool(
            dir.path(),
            "qa.sh",
            &format!(
                "if [ -f {m} ]; then echo '{{\"testsPassed\":true}}'; exit 0; fi\ntouch {m}\nsleep 2\nexit 0\n",
                m = marker.display()
            ),
        );
        write_config(
            &dir,
            &format!(
                "mode = \"sequential\"\nagents = [\"qa\"]\n\n[tools.qa]\nglobal = \"{}\"\n",
                qa.display()
            ),
        );

        ctk(&dir)
            .arg("orchestrate")
            .env("CTK_TOOL_TIMEOUT_MS", "500")
            .assert()
            .success();

        let records = read_journal(&dir);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["ok"], false);
        assert_eq!(records[0]["gate"], "failed");
        assert_eq!(records[0]["retries"], 0);
        assert_eq!(records[1]["ok"], true);
        assert_eq!(records[1]["gate"], "passed");
        assert_eq!(records[1]["retries"], 1);
    }

    #[test]
    fn test_security_violation_aborts_strict_tenant() {
        // PII-shaped content in a pass-through payload trips the filter;
        // strict security aborts with no retry.
        let dir = create_temp_project();
        let sql = write_tool(
            dir.path(),
            "sql.sh",
            "echo '{\"rows\": 1, \"contact\": \"jane.doe@example.com\"}'\nexit 0\n",
        );
        write_config(
            &dir,
            &format!(
                "project = \"THR\"\nagents = [\"sql\"]\n\n[tools.sql]\ntenant = \"{}\"\n",
                sql.display()
            ),
        );

        let assert = ctk(&dir)
            .arg("orchestrate")
            .env("CTK_APPROVED", "1")
            .assert()
            .code(1);
        // Counters only; the matched address must never be echoed.
        let output = assert.get_output();
        let all = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        assert!(!all.contains("jane.doe@example.com"));

        let records = read_journal(&dir);
        assert_eq!(records.len(), 1, "security violations never retry");
        assert_eq!(records[0]["ok"], false);
        assert_eq!(records[0]["gate"], "failed");
    }

    #[test]
    fn test_symlink_tool_fails_the_step() {
        let dir = create_temp_project();
        let target = write_tool(dir.path(), "real.sh", "exit 0\n");
        let link = dir.path().join("qa.sh");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        write_config(
            &dir,
            &format!(
                "agents = [\"qa\"]\n\n[tools.qa]\nglobal = \"{}\"\n",
                link.display()
            ),
        );

        ctk(&dir).arg("orchestrate").assert().code(1);
        let records = read_journal(&dir);
        // Refusal is retried once like any non-security failure.
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r["ok"] == false));
    }

    #[test]
    fn test_unresolvable_role_fails_before_metrics() {
        let dir = create_temp_project();
        write_config(&dir, "agents = [\"memory\"]\n");
        ctk(&dir)
            .arg("orchestrate")
            .assert()
            .failure()
            .stderr(predicate::str::contains("memory"));
    }
}

// =============================================================================
// Hybrid runs
// =============================================================================

mod hybrid_runs {
    use super::*;

    fn stamping_tool(dir: &Path, role: &str, stamp_dir: &Path) -> PathBuf {
        write_tool(
            dir,
            &format!("{role}.sh"),
            &format!(
                "date +%s%N > {d}/{role}.start\nsleep 0.2\ndate +%s%N > {d}/{role}.end\nexit 0\n",
                d = stamp_dir.display()
            ),
        )
    }

    #[test]
    fn test_bounded_parallel_phase_serializes_with_one_slot() {
        let dir = create_temp_project();
        let stamp_dir = dir.path().join("stamps");
        fs::create_dir_all(&stamp_dir).unwrap();
        let memory = stamping_tool(dir.path(), "memory", &stamp_dir);
        let validation = stamping_tool(dir.path(), "validation", &stamp_dir);
        write_config(
            &dir,
            &format!(
                r#"
project = "analytics"
mode = "hybrid"

[[phases]]
name = "impl"
mode = "parallel"
agents = ["memory", "validation"]

[tools.memory]
global = "{}"

[tools.validation]
global = "{}"
"#,
                memory.display(),
                validation.display()
            ),
        );

        ctk(&dir)
            .arg("orchestrate")
            .env("CTK_MAX_PARALLEL", "1")
            .assert()
            .success();

        let read = |name: &str| -> u128 {
            fs::read_to_string(stamp_dir.join(name))
                .unwrap()
                .trim()
                .parse()
                .unwrap()
        };
        let (m_start, m_end) = (read("memory.start"), read("memory.end"));
        let (v_start, v_end) = (read("validation.start"), read("validation.end"));
        assert!(
            m_end <= v_start || v_end <= m_start,
            "steps must not overlap with CTK_MAX_PARALLEL=1"
        );

        let records = read_journal(&dir);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r["ok"] == true));
    }

    #[test]
    fn test_parallel_phase_children_see_phase_flag() {
        let dir = create_temp_project();
        let out = dir.path().join("child-env");
        let memory = write_tool(
            dir.path(),
            "memory.sh",
            &format!("env > {}\nexit 0\n", out.display()),
        );
        write_config(
            &dir,
            &format!(
                r#"
project = "analytics"
mode = "hybrid"

[[phases]]
name = "impl"
mode = "parallel"
agents = ["memory"]

[tools.memory]
global = "{}"
"#,
                memory.display()
            ),
        );

        ctk(&dir).arg("orchestrate").assert().success();

        let env_dump = fs::read_to_string(&out).unwrap();
        assert!(env_dump.contains("CTK_PARALLEL_PHASE=1"));
        assert!(env_dump.contains("CTK_PROJECT=analytics"));
        assert!(env_dump.contains("CTK_RUN_ID="));
        assert!(!env_dump.contains("CTK_STRICT_MODE"));
        assert!(
            !env_dump.contains("CARGO"),
            "parent env must not leak past the allow-list"
        );
    }
}

// =============================================================================
// Dry runs and the immutable tenant approval
// =============================================================================

mod dry_runs {
    use super::*;

    #[test]
    fn test_dry_run_resolves_but_executes_nothing() {
        let dir = create_temp_project();
        let marker = dir.path().join("ran");
        let memory = write_tool(
            dir.path(),
            "memory.sh",
            &format!("touch {}\nexit 0\n", marker.display()),
        );
        write_config(
            &dir,
            &format!(
                "agents = [\"memory\"]\n\n[tools.memory]\nglobal = \"{}\"\n",
                memory.display()
            ),
        );

        ctk(&dir)
            .arg("orchestrate")
            .arg("--dry-run")
            .assert()
            .success()
            .stdout(predicate::str::contains("memory.sh"));

        assert!(!marker.exists(), "dry run must not execute tools");
        assert!(!dir.path().join(".ctk/metrics").exists());
    }

    #[test]
    fn test_immutable_tenant_without_approval_forces_dry_run() {
        let dir = create_temp_project();
        let marker = dir.path().join("ran");
        let memory = write_tool(
            dir.path(),
            "memory.sh",
            &format!("touch {}\nexit 0\n", marker.display()),
        );
        write_config(
            &dir,
            &format!(
                "project = \"THR\"\nagents = [\"memory\"]\n\n[tools.memory]\ntenant = \"{}\"\n",
                memory.display()
            ),
        );

        // No CTK_APPROVED: the run is downgraded to a dry run.
        ctk(&dir)
            .arg("orchestrate")
            .assert()
            .success()
            .stdout(predicate::str::contains("CTK_APPROVED"));
        assert!(!marker.exists());

        // With approval the tool actually runs.
        ctk(&dir)
            .arg("orchestrate")
            .env("CTK_APPROVED", "1")
            .assert()
            .success();
        assert!(marker.exists());
    }

    #[test]
    fn test_registry_command_prints_resolution_table() {
        let dir = create_temp_project();
        let memory = write_tool(dir.path(), "memory.sh", "exit 0\n");
        write_config(
            &dir,
            &format!(
                "agents = [\"memory\", \"qa\"]\n\n[tools.memory]\nglobal = \"{}\"\n",
                memory.display()
            ),
        );

        ctk(&dir)
            .arg("registry")
            .assert()
            .success()
            .stdout(predicate::str::contains("memory.sh"))
            .stdout(predicate::str::contains("unresolved"));
    }
}
