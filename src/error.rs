//! Error types for registration, resolution, and turn execution.
//!
//! Application payload errors raised by orchestration code stay plain `String`s
//! (see `OrchestrationHandler::invoke`); the enums here describe failures of the
//! core itself.

use thiserror::Error;

/// Raised while building an `OrchestrationRegistry`. Any of these must stop a
/// worker from starting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("orchestration name must not be empty")]
    EmptyName,
    #[error("duplicate orchestration registration: {name}")]
    DuplicateOrchestration { name: String },
    #[error("duplicate orchestration registration: {name}@{version}")]
    DuplicateVersion { name: String, version: String },
    /// A name is registered either unversioned or with versions, never both.
    #[error("orchestration {name} cannot be registered both with and without a version")]
    MixedVersioning { name: String },
    #[error("orchestration {name} already has latest version {existing}; cannot also mark {attempted} as latest")]
    DuplicateLatest {
        name: String,
        existing: String,
        attempted: String,
    },
}

/// Raised when an orchestration name (and optional version) cannot be mapped
/// to a registered handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// Nothing at all is registered under this name.
    #[error("unregistered orchestration: {name}")]
    NotFound { name: String },
    /// Versions exist but none is marked latest and no version was requested.
    #[error("no latest version registered for orchestration {name}")]
    NoLatestVersion { name: String },
    /// The name is known but the requested version is not.
    #[error("orchestration {name} has no registered version {version}")]
    VersionNotRegistered { name: String, version: String },
}

/// Why an orchestration execution ended in the `Failed` state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestrationFailure {
    /// Orchestration code returned an error (or panicked).
    #[error("{0}")]
    Application(String),
    /// Orchestration code no longer matches its recorded history.
    #[error("nondeterministic: {0}")]
    Nondeterminism(String),
    /// The worker cannot run the instance's orchestration or version.
    #[error("unresolved: {0}")]
    Unresolved(#[from] ResolutionError),
}

impl OrchestrationFailure {
    pub fn is_nondeterminism(&self) -> bool {
        matches!(self, OrchestrationFailure::Nondeterminism(_))
    }
}

/// Errors returned to the host by `Runtime` and `Worker` calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("instance {instance} is already in terminal state {status}")]
    InstanceTerminal { instance: String, status: String },
    #[error("instance {instance} already has a turn in flight")]
    InstanceBusy { instance: String },
    #[error("turn task for instance {instance} aborted: {reason}")]
    TurnAborted { instance: String, reason: String },
}
