//! Error types for the Halldyll stack engine.
//!
//! This module provides the error hierarchy for every phase of a stack run:
//! configuration, graph construction, deferred value resolution, provider
//! calls, aggregate resolution outcomes, and state management.

use std::path::PathBuf;
use thiserror::Error;

use crate::graph::ResourceId;

/// The main error type for the Halldyll stack engine.
#[derive(Debug, Error)]
pub enum HalldyllError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Graph construction errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Errors raised by a single provider call.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Aggregate resolution or teardown failures.
    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A required stack value was not supplied.
    #[error("Missing required configuration value: {key}")]
    MissingValue {
        /// Key of the missing value.
        key: String,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Errors raised while building the resource graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A declaration with the same type and name already exists.
    #[error("Resource {id} is already declared")]
    Conflict {
        /// Identity of the duplicated declaration.
        id: ResourceId,
    },

    /// The dependency graph contains at least one cycle.
    #[error("Cyclic dependency between: {}", format_ids(.cycle))]
    CyclicDependency {
        /// Declarations that take part in a cycle, in declaration order.
        cycle: Vec<ResourceId>,
    },

    /// A declaration refers to a resource that was never declared.
    #[error("Resource {id} depends on undeclared resource {dependency}")]
    UnknownDependency {
        /// Declaration holding the dangling reference.
        id: ResourceId,
        /// The reference that could not be found.
        dependency: ResourceId,
    },

    /// A property path could not be applied to the property bag.
    #[error("Invalid property path '{path}' on {id}: {message}")]
    InvalidPropertyPath {
        /// Declaration whose properties were being edited.
        id: ResourceId,
        /// Dotted path that failed.
        path: String,
        /// Why the path was rejected.
        message: String,
    },
}

/// Errors produced when a deferred value cannot be resolved.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeferredError {
    /// The resource backing this value was never realized.
    #[error("{id} was not resolved: {reason}")]
    Unresolved {
        /// Resource whose output was awaited.
        id: ResourceId,
        /// Why it was not resolved (failed, poisoned, cancelled, undeclared).
        reason: String,
    },

    /// The realized resource does not expose the requested output.
    #[error("{id} has no output named '{key}'")]
    MissingOutput {
        /// Resource that was realized.
        id: ResourceId,
        /// Requested output path.
        key: String,
    },

    /// An output had an unexpected shape for the requested conversion.
    #[error("Output '{key}' of {id} has unexpected type: expected {expected}")]
    UnexpectedType {
        /// Resource that produced the output.
        id: ResourceId,
        /// Output path.
        key: String,
        /// Expected JSON type.
        expected: &'static str,
    },

    /// A fallible transform rejected its input.
    #[error("Value transform failed: {message}")]
    Transform {
        /// Description of the failure.
        message: String,
    },
}

/// Errors raised by a provider call. Every variant names the declaration it
/// was issued for.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    /// The provider refused the request.
    #[error("Provider rejected {id}: {message}")]
    Rejected {
        /// Offending declaration.
        id: ResourceId,
        /// Provider-supplied message.
        message: String,
    },

    /// API request failed with a non-success status.
    #[error("Provider request for {id} failed: {status} - {message}")]
    ApiRequestFailed {
        /// Offending declaration.
        id: ResourceId,
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Authentication failed.
    #[error("Provider authentication failed for {id}: {message}")]
    AuthenticationFailed {
        /// Offending declaration.
        id: ResourceId,
        /// Description of the auth failure.
        message: String,
    },

    /// Rate limited.
    #[error("Provider rate limited {id}, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Offending declaration.
        id: ResourceId,
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Network error.
    #[error("Network error while resolving {id}: {message}")]
    NetworkError {
        /// Offending declaration.
        id: ResourceId,
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the provider.
    #[error("Invalid provider response for {id}: {message}")]
    InvalidResponse {
        /// Offending declaration.
        id: ResourceId,
        /// Description of the response issue.
        message: String,
    },

    /// The resource does not exist on the provider side.
    #[error("Resource {id} not found")]
    NotFound {
        /// Offending declaration.
        id: ResourceId,
    },

    /// No provider is registered for the resource type.
    #[error("No provider registered for {id}")]
    NoProvider {
        /// Offending declaration.
        id: ResourceId,
    },

    /// The provider call exceeded its deadline.
    #[error("Provider call for {id} timed out after {timeout_secs} seconds")]
    Timeout {
        /// Offending declaration.
        id: ResourceId,
        /// Deadline that was exceeded.
        timeout_secs: u64,
    },

    /// The declaration's inputs could not be realized.
    #[error("Inputs of {id} could not be resolved: {cause}")]
    InputUnavailable {
        /// Offending declaration.
        id: ResourceId,
        /// The deferred value failure.
        cause: DeferredError,
    },

    /// The provider task panicked.
    #[error("Provider call for {id} panicked")]
    Panicked {
        /// Offending declaration.
        id: ResourceId,
    },

    /// The provider task ended without reporting, e.g. it was aborted.
    #[error("Provider call for {id} was lost: {message}")]
    Lost {
        /// Offending declaration.
        id: ResourceId,
        /// Why the task ended.
        message: String,
    },
}

/// A resource that was never issued because a resource it is ordered
/// after failed: an ancestor during resolution, a dependent during teardown.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{id} skipped: {root} failed")]
pub struct PoisonedDependencyError {
    /// Resource that was skipped.
    pub id: ResourceId,
    /// The failed resource that poisoned it.
    pub root: ResourceId,
}

/// Aggregate failures of a resolution or teardown run.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// One or more provider calls failed.
    #[error(
        "{} declaration(s) failed ({}), {} poisoned, {} never issued",
        .failed.len(),
        format_failed(.failed),
        .poisoned.len(),
        .skipped.len()
    )]
    Aggregate {
        /// Declarations whose provider call failed.
        failed: Vec<ProviderError>,
        /// Declarations skipped because an ancestor failed.
        poisoned: Vec<PoisonedDependencyError>,
        /// Declarations never issued because the run was also cancelled.
        skipped: Vec<ResourceId>,
    },

    /// The run was cancelled before every declaration was issued.
    #[error("Cancelled with {} declaration(s) never issued", .skipped.len())]
    Cancelled {
        /// Declarations that were never issued.
        skipped: Vec<ResourceId>,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Reading or writing the state backend failed.
    #[error("State storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Result type alias for Halldyll operations.
pub type Result<T> = std::result::Result<T, HalldyllError>;

fn format_ids(ids: &[ResourceId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_failed(failed: &[ProviderError]) -> String {
    failed
        .iter()
        .map(|e| e.id().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl HalldyllError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl DeferredError {
    /// Creates an unresolved error for the given resource.
    #[must_use]
    pub fn unresolved(id: &ResourceId, reason: impl Into<String>) -> Self {
        Self::Unresolved {
            id: id.clone(),
            reason: reason.into(),
        }
    }
}

impl ProviderError {
    /// Returns the declaration this error was raised for.
    #[must_use]
    pub const fn id(&self) -> &ResourceId {
        match self {
            Self::Rejected { id, .. }
            | Self::ApiRequestFailed { id, .. }
            | Self::AuthenticationFailed { id, .. }
            | Self::RateLimited { id, .. }
            | Self::NetworkError { id, .. }
            | Self::InvalidResponse { id, .. }
            | Self::NotFound { id }
            | Self::NoProvider { id }
            | Self::Timeout { id, .. }
            | Self::InputUnavailable { id, .. }
            | Self::Panicked { id }
            | Self::Lost { id, .. } => id,
        }
    }

    /// Returns true if the provider integration may retry this call.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::NetworkError { .. } => true,
            Self::ApiRequestFailed { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Delay the server asked for before the next attempt, if any.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs, .. } if *retry_after_secs > 0 => {
                Some(*retry_after_secs)
            }
            _ => None,
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(id: &ResourceId, message: impl Into<String>) -> Self {
        Self::NetworkError {
            id: id.clone(),
            message: message.into(),
        }
    }

    /// Creates an API request error.
    #[must_use]
    pub fn api_error(id: &ResourceId, status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            id: id.clone(),
            status,
            message: message.into(),
        }
    }

    /// Creates an invalid response error.
    #[must_use]
    pub fn invalid_response(id: &ResourceId, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            id: id.clone(),
            message: message.into(),
        }
    }
}

impl StateError {
    /// Creates a storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_message_names_failed_declarations() {
        let a = ResourceId::new("test:index:Thing", "a");
        let b = ResourceId::new("test:index:Thing", "b");
        let err = ResolveError::Aggregate {
            failed: vec![ProviderError::Rejected {
                id: a.clone(),
                message: String::from("boom"),
            }],
            poisoned: vec![PoisonedDependencyError { id: b, root: a }],
            skipped: vec![ResourceId::new("test:index:Thing", "c")],
        };

        let message = err.to_string();
        assert!(message.contains("1 declaration(s) failed"));
        assert!(message.contains("test:index:Thing::a"));
        assert!(message.contains("1 poisoned"));
        assert!(message.contains("1 never issued"));
    }

    #[test]
    fn test_retryable_provider_errors() {
        let id = ResourceId::new("test:index:Thing", "a");
        assert!(ProviderError::network(&id, "reset").is_retryable());
        assert!(ProviderError::api_error(&id, 503, "unavailable").is_retryable());
        assert!(!ProviderError::api_error(&id, 400, "bad").is_retryable());
        assert!(!ProviderError::NotFound { id: id.clone() }.is_retryable());

        let limited = ProviderError::RateLimited {
            id: id.clone(),
            retry_after_secs: 7,
        };
        assert!(limited.is_retryable());
        assert_eq!(limited.retry_delay_secs(), Some(7));

        let unspecified = ProviderError::RateLimited {
            id: id.clone(),
            retry_after_secs: 0,
        };
        assert_eq!(unspecified.retry_delay_secs(), None);
        assert_eq!(ProviderError::network(&id, "reset").retry_delay_secs(), None);
    }

    #[test]
    fn test_cycle_message_lists_members() {
        let err = GraphError::CyclicDependency {
            cycle: vec![
                ResourceId::new("t:i:A", "a"),
                ResourceId::new("t:i:B", "b"),
            ],
        };
        assert_eq!(err.to_string(), "Cyclic dependency between: t:i:A::a, t:i:B::b");
    }
}
