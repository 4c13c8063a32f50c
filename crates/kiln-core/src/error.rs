// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Unified error type for Kiln crates.

use thiserror::Error;

use crate::types::LifecycleState;

/// Top-level error enum shared across the workspace.
///
/// Service crates return `KilnError` from every fallible operation so the
/// gateway can map failures onto wire responses in one place.
#[derive(Error, Debug)]
pub enum KilnError {
    /// The referenced identity does not exist.
    #[error("identity not found: {id}")]
    NotFound { id: String },

    /// A lifecycle edge that the state machine does not permit.
    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    /// The identity exists but is not in the state the operation requires.
    #[error("{operation} requires a {expected} identity, found {actual}")]
    InvalidState {
        operation: &'static str,
        expected: LifecycleState,
        actual: LifecycleState,
    },

    /// Optimistic concurrency check failed or a uniqueness rule was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The pool has no assignable identity for the requesting tenant.
    #[error("no available identity for tenant {tenant_id}")]
    NoAvailableIdentity { tenant_id: String },

    /// The backing store rejected or could not complete an operation.
    #[error("identity store unavailable: {source}")]
    StoreUnavailable {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Configuration loading or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Invalid input that is not covered by a more specific variant.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Catch-all for internal invariant violations.
    #[error("internal error: {0}")]
    Internal(String),
}

impl KilnError {
    /// Wrap an arbitrary storage-layer failure.
    pub fn store<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        KilnError::StoreUnavailable {
            source: Box::new(source),
        }
    }

    /// Stable machine-readable code used in wire responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            KilnError::NotFound { .. } => "not_found",
            KilnError::InvalidTransition { .. } => "invalid_transition",
            KilnError::InvalidState { .. } => "invalid_state",
            KilnError::Conflict(_) => "conflict",
            KilnError::NoAvailableIdentity { .. } => "no_available_identity",
            KilnError::StoreUnavailable { .. } => "store_unavailable",
            KilnError::Config(_) => "config",
            KilnError::InvalidArgument(_) => "invalid_argument",
            KilnError::Internal(_) => "internal",
        }
    }
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, KilnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_transition_endpoints() {
        let err = KilnError::InvalidTransition {
            from: LifecycleState::Retired,
            to: LifecycleState::Warming,
        };
        assert_eq!(
            err.to_string(),
            "invalid lifecycle transition: retired -> warming"
        );
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            KilnError::NotFound {
                id: "abc".to_string()
            }
            .code(),
            "not_found"
        );
        assert_eq!(KilnError::Conflict("stale version".to_string()).code(), "conflict");
        assert_eq!(
            KilnError::NoAvailableIdentity {
                tenant_id: "t1".to_string()
            }
            .code(),
            "no_available_identity"
        );
    }

    #[test]
    fn store_wraps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = KilnError::store(io);
        assert_eq!(err.code(), "store_unavailable");
        assert!(err.to_string().contains("disk gone"));
    }
}
