//! Project policy detection.
//!
//! A run's policy envelope is derived exactly once at startup from the
//! working directory and an optional project override, and never mutated
//! afterwards. The tenant named by [`IMMUTABLE_TENANT`] always maps to the
//! strictest envelope: sequential execution, strict security, immutable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// The tenant whose policy envelope cannot be overridden.
pub const IMMUTABLE_TENANT: &str = "THR";

/// Project name used when no tenant marker is found.
pub const DEFAULT_PROJECT: &str = "default";

/// Execution topology of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Sequential,
    Parallel,
    Hybrid,
}

impl RunMode {
    pub const ALL: &[&str] = &["sequential", "parallel", "hybrid"];
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunMode::Sequential => "sequential",
            RunMode::Parallel => "parallel",
            RunMode::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

impl FromStr for RunMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(RunMode::Sequential),
            "parallel" => Ok(RunMode::Parallel),
            "hybrid" => Ok(RunMode::Hybrid),
            _ => Err(()),
        }
    }
}

/// Security profile applied to step artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityProfile {
    Strict,
    #[default]
    Standard,
    Relaxed,
}

impl SecurityProfile {
    pub const ALL: &[&str] = &["strict", "standard", "relaxed"];

    pub fn is_strict(self) -> bool {
        matches!(self, SecurityProfile::Strict)
    }
}

impl fmt::Display for SecurityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SecurityProfile::Strict => "strict",
            SecurityProfile::Standard => "standard",
            SecurityProfile::Relaxed => "relaxed",
        };
        f.write_str(s)
    }
}

impl FromStr for SecurityProfile {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(SecurityProfile::Strict),
            "standard" => Ok(SecurityProfile::Standard),
            "relaxed" => Ok(SecurityProfile::Relaxed),
            _ => Err(()),
        }
    }
}

/// The policy envelope for one run. Derived once; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMode {
    pub project: String,
    pub mode: RunMode,
    pub security: SecurityProfile,
    pub immutable: bool,
}

impl ProjectMode {
    /// Envelope for the immutable tenant.
    pub fn immutable_tenant() -> Self {
        Self {
            project: IMMUTABLE_TENANT.to_string(),
            mode: RunMode::Sequential,
            security: SecurityProfile::Strict,
            immutable: true,
        }
    }

    /// Envelope for a named non-immutable project.
    pub fn standard(project: &str) -> Self {
        Self {
            project: project.to_string(),
            mode: RunMode::Sequential,
            security: SecurityProfile::Standard,
            immutable: false,
        }
    }
}

/// Detect the policy envelope from the working directory and an optional
/// project override (CLI flag or `CTK_PROJECT`). Pure: no I/O beyond the
/// arguments the caller already read.
pub fn detect(cwd: &Path, project_override: Option<&str>) -> ProjectMode {
    if let Some(name) = project_override {
        if name == IMMUTABLE_TENANT {
            return ProjectMode::immutable_tenant();
        }
        return ProjectMode::standard(name);
    }

    if path_has_tenant_marker(cwd, IMMUTABLE_TENANT) {
        return ProjectMode::immutable_tenant();
    }

    ProjectMode::standard(DEFAULT_PROJECT)
}

/// A path carries the tenant marker when any segment equals the tenant name
/// or starts with `<tenant>_`.
fn path_has_tenant_marker(path: &Path, tenant: &str) -> bool {
    let prefix = format!("{tenant}_");
    path.components().any(|c| {
        let seg = c.as_os_str().to_string_lossy();
        seg == tenant || seg.starts_with(&prefix)
    })
}
