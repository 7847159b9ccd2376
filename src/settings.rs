//! Env-driven runtime settings.
//!
//! All orchestrator tunables come from `CTK_*` environment variables, read
//! once at startup. Unset or unparsable values fall back to defaults.

use std::time::Duration;

/// Default per-step deadline.
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 120_000;

/// Default worker-pool size for parallel phases.
pub const DEFAULT_MAX_PARALLEL: usize = 3;

pub const ENV_PROJECT: &str = "CTK_PROJECT";
pub const ENV_HITL: &str = "CTK_HITL";
pub const ENV_LLM_WRAP: &str = "CTK_LLM_WRAP";
pub const ENV_MAX_PARALLEL: &str = "CTK_MAX_PARALLEL";
pub const ENV_TOOL_TIMEOUT_MS: &str = "CTK_TOOL_TIMEOUT_MS";
pub const ENV_APPROVED: &str = "CTK_APPROVED";
pub const ENV_HITL_TIMEOUT_MS: &str = "CTK_HITL_TIMEOUT_MS";

/// Runtime settings snapshot.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Human-approval gates at phase boundaries.
    pub hitl: bool,
    /// Token-telemetry parsing of tool stdout.
    pub llm_wrap: bool,
    /// Worker-pool size for parallel phases.
    pub max_parallel: usize,
    /// Per-step deadline.
    pub tool_timeout: Duration,
    /// Operator approval for a non-dry-run on the immutable tenant.
    pub approved: bool,
    /// Optional auto-continue deadline for HITL prompts (non-immutable only).
    pub hitl_timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hitl: false,
            llm_wrap: false,
            max_parallel: DEFAULT_MAX_PARALLEL,
            tool_timeout: Duration::from_millis(DEFAULT_TOOL_TIMEOUT_MS),
            approved: false,
            hitl_timeout: None,
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self {
            hitl: env_flag(ENV_HITL),
            llm_wrap: env_flag(ENV_LLM_WRAP),
            max_parallel: env_parse(ENV_MAX_PARALLEL)
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_MAX_PARALLEL),
            tool_timeout: Duration::from_millis(
                env_parse(ENV_TOOL_TIMEOUT_MS)
                    .filter(|&ms| ms > 0)
                    .unwrap_or(DEFAULT_TOOL_TIMEOUT_MS),
            ),
            approved: env_flag(ENV_APPROVED),
            hitl_timeout: env_parse(ENV_HITL_TIMEOUT_MS).map(Duration::from_millis),
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1").unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
