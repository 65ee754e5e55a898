//! Error taxonomy for Flock
//!
//! Every failure a caller can observe maps onto one of these variants. Each
//! variant carries a stable `code()` string: the retry-policy table and the
//! JSON-RPC error conversion both key off it.

use thiserror::Error;

use crate::domain_types::AgentId;

/// Main error type for Flock operations
#[derive(Error, Debug)]
pub enum FlockError {
    /// Bad input: missing field, malformed value, unknown enum text
    #[error("Validation error: {field} - {reason}")]
    Validation {
        /// Name of the offending field or parameter
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Unknown agent, home, migration, task, or channel
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind ("home", "agent", "migration", ...)
        kind: String,
        /// Identifier that failed to resolve
        id: String,
    },

    /// Home FSM edge violation
    #[error("Invalid home transition: {from} -> {to}")]
    InvalidTransition {
        /// State the home was in
        from: String,
        /// State the caller asked for
        to: String,
    },

    /// Migration phase FSM edge violation
    #[error("Invalid migration phase transition: {from} -> {to}")]
    InvalidPhaseTransition {
        /// Phase the ticket was in
        from: String,
        /// Phase the caller asked for
        to: String,
    },

    /// A second migration was initiated while one is still active
    #[error("agent {agent_id} already has an active migration ({migration_id})")]
    DuplicateMigration {
        /// Agent with the active ticket
        agent_id: AgentId,
        /// The active ticket's id
        migration_id: String,
    },

    /// The remote peer refused the request (capacity, auth, unknown source)
    #[error("Peer rejected request: {code}: {message}")]
    PeerRejected {
        /// Peer-supplied rejection code (e.g. `UNKNOWN_SOURCE`)
        code: String,
        /// Peer-supplied message
        message: String,
    },

    /// Network-level failure talking to a remote node
    #[error("Network error: {message}")]
    Network {
        /// Transport-level description
        message: String,
    },

    /// An operation exceeded its deadline
    #[error("Timeout during {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
    },

    /// Local filesystem failure (snapshot archive, checksum compute)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store-level failure (query, pool, DDL)
    #[error("Database error: {message}")]
    Database {
        /// Error message from the storage backend
        message: String,
    },

    /// Snapshot verification failed on the target
    #[error("Verification failed: {reason}")]
    VerificationFailed {
        /// Machine-readable failure reason (e.g. `CHECKSUM_MISMATCH`)
        reason: String,
    },

    /// Portable archive exceeds the transfer cap
    #[error("snapshot size {size_bytes} exceeds maximum {max_bytes}")]
    SizeExceeded {
        /// Observed archive size
        size_bytes: u64,
        /// The configured cap
        max_bytes: u64,
    },

    /// Rehydration failed on the target (extract, clone, apply)
    #[error("Rehydrate failed: {message}")]
    RehydrateFailed {
        /// What went wrong on the target
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invariant violation that should never happen in a healthy node
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the broken invariant
        message: String,
    },
}

impl FlockError {
    /// Stable machine-readable code for this error.
    ///
    /// Used by the migration retry-policy map and carried in
    /// JSON-RPC error payloads so peers can branch without string matching.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::InvalidPhaseTransition { .. } => "INVALID_PHASE_TRANSITION",
            Self::DuplicateMigration { .. } => "DUPLICATE_MIGRATION",
            Self::PeerRejected { .. } => "PEER_REJECTED",
            Self::Network { .. } => "NETWORK",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Io(_) => "LOCAL_IO",
            Self::Database { .. } => "DATABASE",
            Self::VerificationFailed { .. } => "VERIFICATION_FAILED",
            Self::SizeExceeded { .. } => "SNAPSHOT_PORTABLE_SIZE_EXCEEDED",
            Self::RehydrateFailed { .. } => "REHYDRATE_FAILED",
            Self::Serialization(_) => "SERIALIZATION",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// JSON-RPC error code this failure is reported as over the wire.
    ///
    /// Standard envelope problems use the reserved codes; every domain
    /// failure shares `-32001` with the `code()` string in `error.data`.
    pub fn json_rpc_code(&self) -> i64 {
        match self {
            Self::Validation { .. } => -32602,
            Self::Serialization(_) => -32600,
            Self::Internal { .. } => -32603,
            _ => -32001,
        }
    }

    /// Convenience constructor for validation failures
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Convenience constructor for not-found failures
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Convenience constructor for internal inconsistencies
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for FlockError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for FlockError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                operation: "http request".to_string(),
            }
        } else {
            Self::Network {
                message: err.to_string(),
            }
        }
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, FlockError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::AgentId;

    #[test]
    fn test_should_expose_stable_code_when_error_is_domain_level() {
        let err = FlockError::DuplicateMigration {
            agent_id: AgentId::try_new("worker-1".to_string()).unwrap(),
            migration_id: "mig-1".to_string(),
        };
        assert_eq!(err.code(), "DUPLICATE_MIGRATION");
        assert_eq!(err.json_rpc_code(), -32001);
    }

    #[test]
    fn test_should_map_validation_to_invalid_params_when_converting_to_json_rpc() {
        let err = FlockError::validation("state", "unknown value");
        assert_eq!(err.json_rpc_code(), -32602);
    }

    #[test]
    fn test_should_mention_active_migration_when_formatting_duplicate() {
        let err = FlockError::DuplicateMigration {
            agent_id: AgentId::try_new("worker-1".to_string()).unwrap(),
            migration_id: "mig-1".to_string(),
        };
        assert!(err.to_string().contains("already has an active migration"));
    }
}
