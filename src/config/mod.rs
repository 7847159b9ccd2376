//! Declarative run configuration.
//!
//! The config document is validated as a raw parsed value first, so every
//! rejection names the offending key verbatim, then deserialized into the
//! typed [`RunConfig`]. The validator never normalizes: an invalid
//! document is an error, not a fixed-up document.

use crate::errors::ConfigError;
use crate::policy::{IMMUTABLE_TENANT, ProjectMode, RunMode, SecurityProfile};
use crate::registry::RegistryEntry;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// The complete recognized key set; anything else is a validation error.
pub const RECOGNIZED_KEYS: &[&str] = &[
    "project",
    "mode",
    "security",
    "agents",
    "phases",
    "metadata",
    "validation",
    "retries",
    "tools",
];

const PHASE_KEYS: &[&str] = &["name", "mode", "agents"];
const TOOL_KEYS: &[&str] = &["tenant", "global"];

/// Topology of one hybrid phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseMode {
    Sequential,
    Parallel,
}

impl fmt::Display for PhaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseMode::Sequential => f.write_str("sequential"),
            PhaseMode::Parallel => f.write_str("parallel"),
        }
    }
}

/// One phase of a hybrid run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub name: String,
    pub mode: PhaseMode,
    pub agents: Vec<String>,
}

/// The validated run configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub project: Option<String>,
    pub mode: Option<RunMode>,
    pub security: Option<SecurityProfile>,
    pub agents: Option<Vec<String>>,
    pub phases: Option<Vec<PhaseConfig>>,
    /// Opaque, passed through untouched.
    pub metadata: Option<Value>,
    /// Reserved.
    pub validation: Option<Value>,
    /// Reserved; default 1.
    pub retries: Option<u32>,
    /// Registry slots per role.
    pub tools: Option<BTreeMap<String, RegistryEntry>>,
}

impl RunConfig {
    /// Parse an already-validated document.
    pub fn from_document(doc: &Value) -> Result<Self, ConfigError> {
        validate(doc)?;
        // Shapes were just validated; a mismatch here is a validator bug.
        serde_json::from_value(doc.clone()).map_err(|err| ConfigError::InvalidValue {
            key: "<document>".to_string(),
            value: err.to_string(),
            expected: "a validated run config".to_string(),
        })
    }

    pub fn effective_mode(&self, policy: &ProjectMode) -> RunMode {
        self.mode.unwrap_or(policy.mode)
    }

    pub fn effective_security(&self, policy: &ProjectMode) -> SecurityProfile {
        if policy.immutable {
            SecurityProfile::Strict
        } else {
            self.security.unwrap_or(policy.security)
        }
    }

    /// Retries remaining per step after the first attempt.
    pub fn retries(&self) -> u32 {
        self.retries.unwrap_or(1)
    }
}

/// Validate a raw config document. Rules run in the documented order and
/// stop at the first failure.
pub fn validate(doc: &Value) -> Result<(), ConfigError> {
    let Some(map) = doc.as_object() else {
        return Err(ConfigError::NotAMap);
    };

    for key in map.keys() {
        if !RECOGNIZED_KEYS.contains(&key.as_str()) {
            return Err(ConfigError::UnknownKey { key: key.clone() });
        }
    }

    if let Some(mode) = map.get("mode") {
        check_enum(mode, "mode", RunMode::ALL)?;
    }
    if let Some(security) = map.get("security") {
        check_enum(security, "security", SecurityProfile::ALL)?;
    }

    let project = map.get("project").and_then(Value::as_str);
    if project == Some(IMMUTABLE_TENANT) {
        let project = IMMUTABLE_TENANT.to_string();
        if let Some(mode) = map.get("mode").and_then(Value::as_str)
            && mode != "sequential"
        {
            return Err(ConfigError::ImmutableTenantViolation {
                project,
                key: "mode".to_string(),
                required: "sequential".to_string(),
            });
        }
        if let Some(security) = map.get("security").and_then(Value::as_str)
            && security != "strict"
        {
            return Err(ConfigError::ImmutableTenantViolation {
                project,
                key: "security".to_string(),
                required: "strict".to_string(),
            });
        }
        if map.contains_key("phases") {
            return Err(ConfigError::ImmutableTenantPhases { project });
        }
    }

    if let Some(phases) = map.get("phases") {
        if map.get("mode").and_then(Value::as_str) != Some("hybrid") {
            return Err(ConfigError::PhasesRequireHybrid);
        }
        check_phases(phases)?;
    }

    if let Some(agents) = map.get("agents") {
        check_agent_list(agents, "agents")?;
    }

    if let Some(retries) = map.get("retries") {
        match retries.as_i64() {
            Some(0 | 1) => {}
            Some(n) => return Err(ConfigError::InvalidRetries { value: n }),
            None => {
                return Err(ConfigError::InvalidValue {
                    key: "retries".to_string(),
                    value: retries.to_string(),
                    expected: "0 or 1".to_string(),
                });
            }
        }
    }

    if let Some(tools) = map.get("tools") {
        check_tools(tools)?;
    }

    Ok(())
}

fn check_enum(value: &Value, key: &str, allowed: &[&str]) -> Result<(), ConfigError> {
    let ok = value.as_str().map(|s| allowed.contains(&s)).unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: allowed.join(", "),
        })
    }
}

fn check_agent_list(value: &Value, key: &str) -> Result<(), ConfigError> {
    let Some(items) = value.as_array() else {
        return Err(ConfigError::InvalidAgentList {
            key: key.to_string(),
        });
    };
    let mut seen: Vec<&str> = Vec::new();
    for item in items {
        let Some(role) = item.as_str() else {
            return Err(ConfigError::InvalidAgentList {
                key: key.to_string(),
            });
        };
        if seen.contains(&role) {
            return Err(ConfigError::DuplicateRole {
                role: role.to_string(),
                key: key.to_string(),
            });
        }
        seen.push(role);
    }
    Ok(())
}

fn check_phases(value: &Value) -> Result<(), ConfigError> {
    let Some(phases) = value.as_array() else {
        return Err(ConfigError::InvalidPhase {
            index: 0,
            message: "'phases' must be a list of phase tables".to_string(),
        });
    };
    for (index, phase) in phases.iter().enumerate() {
        let Some(map) = phase.as_object() else {
            return Err(ConfigError::InvalidPhase {
                index,
                message: "phase must be a table".to_string(),
            });
        };
        for key in map.keys() {
            if !PHASE_KEYS.contains(&key.as_str()) {
                return Err(ConfigError::InvalidPhase {
                    index,
                    message: format!("unrecognized phase key '{key}'"),
                });
            }
        }
        if map.get("name").and_then(Value::as_str).is_none() {
            return Err(ConfigError::InvalidPhase {
                index,
                message: "'name' must be a string".to_string(),
            });
        }
        match map.get("mode").and_then(Value::as_str) {
            Some("sequential" | "parallel") => {}
            _ => {
                return Err(ConfigError::InvalidPhase {
                    index,
                    message: "'mode' must be 'sequential' or 'parallel'".to_string(),
                });
            }
        }
        let agents = map.get("agents").ok_or_else(|| ConfigError::InvalidPhase {
            index,
            message: "'agents' is required".to_string(),
        })?;
        check_agent_list(agents, &format!("phases[{index}].agents"))?;
    }
    Ok(())
}

fn check_tools(value: &Value) -> Result<(), ConfigError> {
    let Some(tools) = value.as_object() else {
        return Err(ConfigError::InvalidToolEntry {
            role: "<tools>".to_string(),
            message: "'tools' must be a table keyed by role".to_string(),
        });
    };
    for (role, entry) in tools {
        let Some(slots) = entry.as_object() else {
            return Err(ConfigError::InvalidToolEntry {
                role: role.clone(),
                message: "entry must be a table".to_string(),
            });
        };
        for (key, path) in slots {
            if !TOOL_KEYS.contains(&key.as_str()) {
                return Err(ConfigError::InvalidToolEntry {
                    role: role.clone(),
                    message: format!("unrecognized slot '{key}'"),
                });
            }
            if !path.is_string() {
                return Err(ConfigError::InvalidToolEntry {
                    role: role.clone(),
                    message: format!("slot '{key}' must be an absolute path string"),
                });
            }
        }
    }
    Ok(())
}

/// Read a TOML config file into a raw document.
pub fn load_document(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let parsed: toml::Value = toml::from_str(&text)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    serde_json::to_value(parsed).context("Failed to convert config document")
}

/// Discovery order: explicit path, `./ctk.toml`, `./.ctk/config.toml`.
pub fn discover(project_dir: &Path, explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        bail!("Config file not found: {}", path.display());
    }
    for candidate in [
        project_dir.join("ctk.toml"),
        project_dir.join(".ctk").join("config.toml"),
    ] {
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    bail!("No run config found. Create ctk.toml or pass --config");
}
