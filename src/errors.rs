//! Typed error hierarchy for the ctk orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `ConfigError` — declarative run-config validation failures
//! - `RegistryError` — role resolution failures
//! - `OrchestratorError` — run-time failures from the runners

use thiserror::Error;

/// Errors from validating the declarative run config.
///
/// Every variant names the offending key so the operator can fix the
/// document without reading orchestrator source.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Config must be a map/table at the top level")]
    NotAMap,

    #[error("Unrecognized config key '{key}'")]
    UnknownKey { key: String },

    #[error("Invalid value '{value}' for '{key}' (expected one of: {expected})")]
    InvalidValue {
        key: String,
        value: String,
        expected: String,
    },

    #[error("Project '{project}' is immutable: '{key}' must be '{required}'")]
    ImmutableTenantViolation {
        project: String,
        key: String,
        required: String,
    },

    #[error("Project '{project}' is immutable: 'phases' is not permitted")]
    ImmutableTenantPhases { project: String },

    #[error("'phases' requires mode = \"hybrid\"")]
    PhasesRequireHybrid,

    #[error("'{key}' must be an ordered list of role strings")]
    InvalidAgentList { key: String },

    #[error("Role '{role}' appears more than once in '{key}'")]
    DuplicateRole { role: String, key: String },

    #[error("'retries' must be 0 or 1, got {value}")]
    InvalidRetries { value: i64 },

    #[error("Phase entry {index} is invalid: {message}")]
    InvalidPhase { index: usize, message: String },

    #[error("Tool entry for role '{role}' is invalid: {message}")]
    InvalidToolEntry { role: String, message: String },
}

/// Errors from resolving a role to a tool implementation.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("No tool registered for role '{role}'")]
    UnregisteredRole { role: String },

    #[error(
        "No implementation available for role '{role}' (tenant and global slots empty or missing on disk)"
    )]
    NoImplementation { role: String },

    #[error("Registry entry for role '{role}' holds a non-absolute path: {path}")]
    NonAbsolutePath { role: String, path: String },
}

/// Raised by the artifact security filter. Carries only match counters,
/// never the matched text.
#[derive(Debug, Error, PartialEq)]
pub enum SecurityError {
    #[error("Artifacts failed security scan: {summary}")]
    PatternMatch { summary: String },

    #[error("Artifacts exceed size ceiling: {bytes} bytes > {ceiling} bytes")]
    Oversize { bytes: usize, ceiling: usize },

    #[error("Artifacts could not be serialized for scanning")]
    Unserializable,
}

/// Errors from the run orchestrator (sequential and hybrid runners).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Hybrid/parallel execution is forbidden for immutable project '{project}'")]
    ForbiddenTopology { project: String },

    #[error("Run aborted at operator checkpoint")]
    HitlAbort,

    #[error("Step '{role}' failed: {reason}")]
    StepFailed { role: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_unknown_key_names_the_key() {
        let err = ConfigError::UnknownKey {
            key: "agnets".to_string(),
        };
        assert!(err.to_string().contains("agnets"));
    }

    #[test]
    fn config_error_immutable_violation_carries_context() {
        let err = ConfigError::ImmutableTenantViolation {
            project: "THR".to_string(),
            key: "mode".to_string(),
            required: "sequential".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("THR"));
        assert!(msg.contains("mode"));
        assert!(msg.contains("sequential"));
    }

    #[test]
    fn registry_error_variants_are_distinct() {
        let unregistered = RegistryError::UnregisteredRole {
            role: "qa".to_string(),
        };
        let missing = RegistryError::NoImplementation {
            role: "qa".to_string(),
        };
        assert!(matches!(unregistered, RegistryError::UnregisteredRole { .. }));
        assert!(matches!(missing, RegistryError::NoImplementation { .. }));
        assert_ne!(unregistered, missing);
    }

    #[test]
    fn security_error_messages_carry_counters_only() {
        let err = SecurityError::PatternMatch {
            summary: "email=2 api-key=1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("email=2"));
        // The summary format never includes matched text, only family counters.
        assert!(!msg.contains('@'));
    }

    #[test]
    fn orchestrator_error_converts_from_registry_error() {
        let inner = RegistryError::UnregisteredRole {
            role: "sql".to_string(),
        };
        let err: OrchestratorError = inner.into();
        match err {
            OrchestratorError::Registry(RegistryError::UnregisteredRole { role }) => {
                assert_eq!(role, "sql");
            }
            _ => panic!("Expected Registry(UnregisteredRole)"),
        }
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ConfigError::NotAMap);
        assert_std_error(&RegistryError::UnregisteredRole {
            role: "x".to_string(),
        });
        assert_std_error(&SecurityError::Unserializable);
        assert_std_error(&OrchestratorError::HitlAbort);
    }
}
