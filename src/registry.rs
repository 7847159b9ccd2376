//! Tool registry: role → implementation resolution.
//!
//! A static table keyed by role, each entry holding two optional
//! absolute-path slots. The tenant slot takes precedence over the global
//! slot; a slot only wins if its path exists on disk at resolution time.
//! Roles may alternatively be backed by an in-process implementation,
//! chosen at resolution time ahead of any subprocess path.

use crate::adapter::InProcessTool;
use crate::errors::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Logical name of a pipeline step, decoupled from its implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Memory,
    Sql,
    Validation,
    Qa,
    Security,
    Env,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Memory => "memory",
            Role::Sql => "sql",
            Role::Validation => "validation",
            Role::Qa => "qa",
            Role::Security => "security",
            Role::Env => "env",
            Role::Other(name) => name,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        match s {
            "memory" => Role::Memory,
            "sql" => Role::Sql,
            "validation" => Role::Validation,
            "qa" => Role::Qa,
            "security" => Role::Security,
            "env" => Role::Env,
            other => Role::Other(other.to_string()),
        }
    }
}

impl FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Role::from(s))
    }
}

/// Where a resolved tool path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    Tenant,
    Global,
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolSource::Tenant => f.write_str("tenant"),
            ToolSource::Global => f.write_str("global"),
        }
    }
}

/// A resolved subprocess tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRef {
    pub role: Role,
    pub path: PathBuf,
    pub source: ToolSource,
}

/// The two path slots for one role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub tenant: Option<PathBuf>,
    pub global: Option<PathBuf>,
}

/// Outcome of resolution: either a subprocess tool or an in-process
/// implementation. The strategy is fixed here, not probed later.
#[derive(Clone)]
pub enum Resolution {
    Process(ToolRef),
    InProcess(Arc<dyn InProcessTool>),
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Process(tool) => f.debug_tuple("Process").field(tool).finish(),
            Resolution::InProcess(_) => f.write_str("InProcess(..)"),
        }
    }
}

/// Role → implementation table.
#[derive(Default)]
pub struct ToolRegistry {
    entries: BTreeMap<String, RegistryEntry>,
    in_process: BTreeMap<String, Arc<dyn InProcessTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from config `[tools]` slots.
    pub fn from_entries(entries: BTreeMap<String, RegistryEntry>) -> Self {
        Self {
            entries,
            in_process: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, role: &Role, entry: RegistryEntry) {
        self.entries.insert(role.as_str().to_string(), entry);
    }

    /// Back a role with an in-process implementation. Takes precedence
    /// over both path slots at resolution time.
    pub fn register_in_process(&mut self, role: &Role, tool: Arc<dyn InProcessTool>) {
        self.in_process.insert(role.as_str().to_string(), tool);
    }

    pub fn roles(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Resolve a role. Tenant slot wins over global; each slot only counts
    /// when its path exists on disk. Non-absolute entries are a
    /// programming bug and are rejected here rather than at spawn time.
    pub fn resolve(&self, role: &Role) -> Result<Resolution, RegistryError> {
        if let Some(tool) = self.in_process.get(role.as_str()) {
            return Ok(Resolution::InProcess(Arc::clone(tool)));
        }

        let entry = self.entries.get(role.as_str()).ok_or_else(|| {
            RegistryError::UnregisteredRole {
                role: role.to_string(),
            }
        })?;

        for (slot, source) in [
            (&entry.tenant, ToolSource::Tenant),
            (&entry.global, ToolSource::Global),
        ] {
            let Some(path) = slot else { continue };
            if !path.is_absolute() {
                return Err(RegistryError::NonAbsolutePath {
                    role: role.to_string(),
                    path: path.display().to_string(),
                });
            }
            if path_exists(path) {
                return Ok(Resolution::Process(ToolRef {
                    role: role.clone(),
                    path: path.clone(),
                    source,
                }));
            }
        }

        Err(RegistryError::NoImplementation {
            role: role.to_string(),
        })
    }
}

/// Existence check that does not follow the final symlink: a dangling
/// symlink still "exists" here and is rejected later by the launcher with
/// its refusal message.
fn path_exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}
