//! Token-telemetry parsing.
//!
//! Tools may emit JSON lines carrying `llm_tokens_in` / `llm_tokens_out`
//! (with an optional `llm_model`), or a nested `metrics.tokens.{input,output}`
//! shape. The adapter aggregates whatever is present. During a parallel
//! phase this parser is never invoked, because concurrent children would
//! interleave lines; token counts then report zero.

use serde_json::Value;

/// Aggregated telemetry for one step attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Telemetry {
    pub tokens_in: u64,
    pub tokens_out: u64,
    /// Number of telemetry-bearing lines observed.
    pub tool_calls: u64,
}

/// Scan captured stdout and stderr line-by-line for telemetry objects.
pub fn parse_streams(stdout: &str, stderr: &str) -> Telemetry {
    let mut total = Telemetry::default();
    for line in stdout.lines().chain(stderr.lines()) {
        if let Some((tokens_in, tokens_out)) = parse_line(line) {
            total.tokens_in += tokens_in;
            total.tokens_out += tokens_out;
            total.tool_calls += 1;
        }
    }
    total
}

fn parse_line(line: &str) -> Option<(u64, u64)> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    let obj = value.as_object()?;

    if let Some(model) = obj.get("llm_model").and_then(Value::as_str) {
        tracing::debug!(model, "telemetry line reported model");
    }

    let flat_in = obj.get("llm_tokens_in").and_then(Value::as_u64);
    let flat_out = obj.get("llm_tokens_out").and_then(Value::as_u64);
    if flat_in.is_some() || flat_out.is_some() {
        return Some((flat_in.unwrap_or(0), flat_out.unwrap_or(0)));
    }

    let tokens = obj.get("metrics")?.get("tokens")?;
    let nested_in = tokens.get("input").and_then(Value::as_u64);
    let nested_out = tokens.get("output").and_then(Value::as_u64);
    if nested_in.is_some() || nested_out.is_some() {
        return Some((nested_in.unwrap_or(0), nested_out.unwrap_or(0)));
    }
    None
}
