//! CLI command implementations.

use crate::baton::Baton;
use crate::config::{self, PhaseConfig, PhaseMode, RunConfig};
use crate::hitl::{HitlGate, TerminalApprover};
use crate::metrics::{MetricsRecorder, summarize};
use crate::policy::{self, RunMode};
use crate::registry::{Role, ToolRegistry};
use crate::runner::{self, RunContext, RunReport};
use crate::security::SecurityFilter;
use crate::settings::{ENV_PROJECT, Settings};
use crate::ui;
use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct OrchestrateArgs {
    pub project_dir: PathBuf,
    pub config: Option<PathBuf>,
    pub project: Option<String>,
    pub mode: Option<RunMode>,
    pub dry_run: bool,
}

/// Run a pipeline. Returns the process exit code.
pub async fn orchestrate(args: OrchestrateArgs) -> Result<i32> {
    let settings = Settings::from_env();

    let config_path = config::discover(&args.project_dir, args.config.as_deref())?;
    let mut doc = config::load_document(&config_path)?;

    // CLI flags are explicit operator input; they land in the document
    // before validation so tenant rules see the final values.
    if let (Some(project), Some(map)) = (&args.project, doc.as_object_mut()) {
        map.insert("project".to_string(), json!(project));
    }
    if let (Some(mode), Some(map)) = (args.mode, doc.as_object_mut()) {
        map.insert("mode".to_string(), json!(mode.to_string()));
    }

    let cfg = match RunConfig::from_document(&doc) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Config validation failed: {err}");
            return Ok(1);
        }
    };

    // Project precedence: CLI flag, env override, config, directory marker.
    let override_name = args
        .project
        .clone()
        .or_else(|| std::env::var(ENV_PROJECT).ok())
        .or_else(|| cfg.project.clone());
    let policy = policy::detect(&args.project_dir, override_name.as_deref());

    let mode = cfg.effective_mode(&policy);
    let security = cfg.effective_security(&policy);

    let registry = cfg
        .tools
        .clone()
        .map(ToolRegistry::from_entries)
        .unwrap_or_default();

    let plan = build_plan(&cfg, mode);

    // The immutable tenant needs explicit operator approval for a real run.
    let mut dry_run = args.dry_run;
    if policy.immutable && !settings.approved && !dry_run {
        println!(
            "Project '{}' requires CTK_APPROVED=1 for a non-dry-run; forcing --dry-run",
            policy.project
        );
        dry_run = true;
    }

    if dry_run {
        println!("Dry run: resolving plan, executing nothing");
        for phase in &plan {
            println!("phase '{}' ({})", phase.name, phase.mode);
            for name in &phase.agents {
                let role = Role::from(name.as_str());
                let resolution = registry
                    .resolve(&role)
                    .with_context(|| format!("Plan role '{role}' does not resolve"))?;
                ui::print_plan_entry(name, &resolution);
            }
        }
        return Ok(0);
    }

    let run_id = runner::new_run_id();
    let metrics = MetricsRecorder::new(&args.project_dir.join(".ctk").join("metrics"), &run_id)?;
    let hitl = HitlGate::new(
        settings.hitl,
        policy.immutable,
        settings.hitl_timeout,
        Arc::new(TerminalApprover),
    );

    ui::print_run_header(&run_id, &policy, mode);

    let ctx = RunContext {
        run_id,
        policy,
        security,
        retries: cfg.retries(),
        settings,
        registry: Arc::new(registry),
        metrics: Arc::new(metrics),
        filter: Arc::new(SecurityFilter::new()),
        hitl: Arc::new(hitl),
    };

    let report = match mode {
        RunMode::Sequential => {
            let agents: Vec<Role> = cfg
                .agents
                .clone()
                .unwrap_or_default()
                .iter()
                .map(|name| Role::from(name.as_str()))
                .collect();
            runner::sequential::run(&ctx, &agents, Baton::new()).await?
        }
        // A top-level parallel run is one parallel phase over `agents`.
        RunMode::Parallel | RunMode::Hybrid => {
            runner::hybrid::run(&ctx, &plan, Baton::new()).await?
        }
    };

    finish(&ctx, &report);
    Ok(report.exit_code())
}

fn build_plan(cfg: &RunConfig, mode: RunMode) -> Vec<PhaseConfig> {
    match mode {
        RunMode::Hybrid => cfg.phases.clone().unwrap_or_default(),
        RunMode::Parallel => vec![PhaseConfig {
            name: "run".to_string(),
            mode: PhaseMode::Parallel,
            agents: cfg.agents.clone().unwrap_or_default(),
        }],
        RunMode::Sequential => vec![PhaseConfig {
            name: "run".to_string(),
            mode: PhaseMode::Sequential,
            agents: cfg.agents.clone().unwrap_or_default(),
        }],
    }
}

fn finish(ctx: &RunContext, report: &RunReport) {
    for outcome in &report.steps {
        ui::print_step_line(outcome);
    }
    let records = ctx.metrics.load_journal().unwrap_or_default();
    let totals = summarize(&records);
    ui::print_run_summary(report, &totals);
}

/// Validate the config document and report the first error.
pub fn validate(project_dir: &Path, explicit: Option<&Path>) -> Result<i32> {
    let config_path = config::discover(project_dir, explicit)?;
    let doc = config::load_document(&config_path)?;
    match config::validate(&doc) {
        Ok(()) => {
            println!("ok: {}", config_path.display());
            Ok(0)
        }
        Err(err) => {
            eprintln!("invalid: {err}");
            Ok(1)
        }
    }
}

/// Print the resolution table for the configured plan.
pub fn registry(project_dir: &Path, explicit: Option<&Path>) -> Result<i32> {
    let config_path = config::discover(project_dir, explicit)?;
    let doc = config::load_document(&config_path)?;
    let cfg = match RunConfig::from_document(&doc) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Config validation failed: {err}");
            return Ok(1);
        }
    };

    let registry = cfg
        .tools
        .clone()
        .map(ToolRegistry::from_entries)
        .unwrap_or_default();

    let mut names: Vec<String> = cfg.agents.clone().unwrap_or_default();
    for phase in cfg.phases.iter().flatten() {
        for name in &phase.agents {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
    }

    for name in &names {
        let role = Role::from(name.as_str());
        match registry.resolve(&role) {
            Ok(resolution) => ui::print_plan_entry(name, &resolution),
            Err(err) => println!("  {name:<12} unresolved: {err}"),
        }
    }
    Ok(0)
}
