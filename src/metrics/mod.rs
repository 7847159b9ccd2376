//! Metrics recorder.
//!
//! One record per step attempt, appended to a per-run journal
//! (`runs/<run_id>.jsonl`) and to a rolling CSV index (`index.csv`) with
//! the same columns. Appends are single writes on append-mode handles,
//! serialized by an in-process mutex so concurrent workers from a
//! parallel phase never interleave partial lines.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Gate verdict recorded with each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateOutcome {
    Passed,
    Failed,
    None,
}

impl GateOutcome {
    fn as_str(self) -> &'static str {
        match self {
            GateOutcome::Passed => "passed",
            GateOutcome::Failed => "failed",
            GateOutcome::None => "none",
        }
    }
}

/// One step attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub project: String,
    pub role: String,
    pub elapsed_ms: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub tool_calls: u64,
    pub ok: bool,
    pub retries: u32,
    pub gate: GateOutcome,
}

const INDEX_HEADER: &str =
    "run_id,timestamp,project,role,elapsed_ms,tokens_in,tokens_out,tool_calls,ok,retries,gate";

/// Appender for one run.
pub struct MetricsRecorder {
    run_id: String,
    journal_file: PathBuf,
    index_file: PathBuf,
    lock: Mutex<()>,
}

impl MetricsRecorder {
    /// Open (and lay out) the metrics directory for a run.
    pub fn new(metrics_dir: &Path, run_id: &str) -> Result<Self> {
        let runs_dir = metrics_dir.join("runs");
        fs::create_dir_all(&runs_dir).context("Failed to create metrics runs directory")?;

        let index_file = metrics_dir.join("index.csv");
        if !index_file.exists() {
            fs::write(&index_file, format!("{INDEX_HEADER}\n"))
                .context("Failed to write metrics index header")?;
        }

        Ok(Self {
            run_id: run_id.to_string(),
            journal_file: runs_dir.join(format!("{run_id}.jsonl")),
            index_file,
            lock: Mutex::new(()),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_file
    }

    /// Append one record to the journal and the rolling index.
    pub fn record(&self, record: &MetricRecord) -> Result<()> {
        let json_line = serde_json::to_string(record).context("Failed to serialize record")?;
        let csv_line = csv_line(record);

        let guard = self.lock.lock();
        let _guard = match guard {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        append_line(&self.journal_file, &json_line).context("Failed to append journal record")?;
        append_line(&self.index_file, &csv_line).context("Failed to append index record")?;
        Ok(())
    }

    /// Read this run's journal back.
    pub fn load_journal(&self) -> Result<Vec<MetricRecord>> {
        load_journal_file(&self.journal_file)
    }
}

/// Read any run's journal from a metrics directory.
pub fn load_journal(metrics_dir: &Path, run_id: &str) -> Result<Vec<MetricRecord>> {
    load_journal_file(&metrics_dir.join("runs").join(format!("{run_id}.jsonl")))
}

fn load_journal_file(path: &Path) -> Result<Vec<MetricRecord>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read journal {}", path.display()))?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).context("Failed to parse journal record"))
        .collect()
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    file.write_all(format!("{line}\n").as_bytes())?;
    Ok(())
}

fn csv_line(record: &MetricRecord) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{},{},{}",
        record.run_id,
        record.timestamp.to_rfc3339(),
        record.project,
        record.role,
        record.elapsed_ms,
        record.tokens_in,
        record.tokens_out,
        record.tool_calls,
        record.ok,
        record.retries,
        record.gate.as_str(),
    )
}

/// Cumulative totals for the end-of-run summary line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunTotals {
    pub agents: usize,
    pub tool_calls: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

pub fn summarize(records: &[MetricRecord]) -> RunTotals {
    let mut totals = RunTotals::default();
    let mut executed: Vec<&str> = Vec::new();
    for record in records {
        totals.tool_calls += record.tool_calls;
        totals.tokens_in += record.tokens_in;
        totals.tokens_out += record.tokens_out;
        if !executed.contains(&record.role.as_str()) {
            executed.push(&record.role);
        }
    }
    totals.agents = executed.len();
    totals
}

/// The one-line human summary emitted after a run finishes.
pub fn format_summary(totals: &RunTotals, wall: Duration) -> String {
    format!(
        "{} agent(s) executed, {} tool call(s), {} tokens in / {} tokens out, {:.1}s",
        totals.agents,
        totals.tool_calls,
        totals.tokens_in,
        totals.tokens_out,
        wall.as_secs_f64(),
    )
}
