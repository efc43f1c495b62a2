//! Error types for registry operations.

use thiserror::Error;

/// Failures surfaced by the tool registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A role has fewer registered tools than selection needs to degrade.
    #[error("role '{role}' has {count} registered tools; at least 2 are required for fallback")]
    InsufficientCoverage {
        /// Role with insufficient coverage.
        role: String,
        /// Number of tools currently registered for the role.
        count: usize,
    },

    /// Lookup for an unregistered tool id.
    #[error("tool '{id}' is not registered")]
    ToolNotFound {
        /// The missing tool id.
        id: String,
    },

    /// No registered tools can fill a requested role.
    #[error("no registered tools can fill role '{role}'")]
    NoToolsForRole {
        /// The uncovered role.
        role: String,
    },

    /// A hosted tool failed to start under supervision.
    #[error("hosted tool '{id}' failed to start: {reason}")]
    HostedStartFailed {
        /// The hosted tool id.
        id: String,
        /// Start failure detail.
        reason: String,
    },
}
