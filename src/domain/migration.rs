//! Migration ticket domain types
//!
//! One [`MigrationTicket`] records one in-flight migration. Tickets move
//! through a strict 13-state phase machine; the complete transition table
//! lives in [`MigrationPhase::valid_transitions`] and every phase update is
//! validated against it. Ownership of the agent's state stays with the
//! source until the `VERIFYING -> REHYDRATING` edge, which flips it to the
//! target atomically with the phase write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::domain_types::{AgentId, HomeId, MigrationId, NodeId};

/// Migration phase enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationPhase {
    /// Ticket created, target not yet contacted
    Requested,
    /// Target accepted the request
    Authorized,
    /// Source home being frozen
    Freezing,
    /// Source home frozen, traffic guarded
    Frozen,
    /// Portable archive being produced
    Snapshotting,
    /// Archive in flight to the target
    Transferring,
    /// Target verifying checksum and archive integrity
    Verifying,
    /// Target unpacking and restoring work state
    Rehydrating,
    /// Registry and assignment updates in progress
    Finalizing,
    /// Terminal: migration succeeded
    Completed,
    /// Unwinding a partial migration
    RollingBack,
    /// Terminal: migration rolled back cleanly
    Aborted,
    /// Terminal: migration failed
    Failed,
}

impl MigrationPhase {
    /// The ten canonical forward phases, in order
    pub const CANONICAL_ORDER: [Self; 10] = [
        Self::Requested,
        Self::Authorized,
        Self::Freezing,
        Self::Frozen,
        Self::Snapshotting,
        Self::Transferring,
        Self::Verifying,
        Self::Rehydrating,
        Self::Finalizing,
        Self::Completed,
    ];

    /// Every phase, for exhaustive table checks
    pub const ALL: [Self; 13] = [
        Self::Requested,
        Self::Authorized,
        Self::Freezing,
        Self::Frozen,
        Self::Snapshotting,
        Self::Transferring,
        Self::Verifying,
        Self::Rehydrating,
        Self::Finalizing,
        Self::Completed,
        Self::RollingBack,
        Self::Aborted,
        Self::Failed,
    ];

    /// Gets all valid next phases from the current phase.
    ///
    /// FAILED is reachable from every non-terminal phase; ROLLING_BACK only
    /// from FROZEN onward.
    pub fn valid_transitions(&self) -> Vec<Self> {
        match self {
            Self::Requested => vec![Self::Authorized, Self::Failed],
            Self::Authorized => vec![Self::Freezing, Self::Failed],
            Self::Freezing => vec![Self::Frozen, Self::Failed],
            Self::Frozen => vec![Self::Snapshotting, Self::RollingBack, Self::Failed],
            Self::Snapshotting => vec![Self::Transferring, Self::RollingBack, Self::Failed],
            Self::Transferring => vec![Self::Verifying, Self::RollingBack, Self::Failed],
            Self::Verifying => vec![Self::Rehydrating, Self::RollingBack, Self::Failed],
            Self::Rehydrating => vec![Self::Finalizing, Self::RollingBack, Self::Failed],
            Self::Finalizing => vec![Self::Completed, Self::RollingBack, Self::Failed],
            Self::RollingBack => vec![Self::Aborted, Self::Failed],
            Self::Completed | Self::Aborted | Self::Failed => vec![],
        }
    }

    /// Validates if a transition to the new phase is allowed
    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// The canonical successor on the happy path, if one exists
    pub fn next_canonical(&self) -> Option<Self> {
        let order = Self::CANONICAL_ORDER;
        order
            .iter()
            .position(|phase| phase == self)
            .and_then(|idx| order.get(idx + 1).copied())
    }

    /// Checks if the phase is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }

    /// Phases during which the frozen guard rejects inbound messages
    pub fn is_frozen_phase(&self) -> bool {
        matches!(
            self,
            Self::Freezing
                | Self::Frozen
                | Self::Snapshotting
                | Self::Transferring
                | Self::Verifying
                | Self::Rehydrating
        )
    }

    /// Wall-clock budget for the phase.
    ///
    /// Exceeding it moves the ticket to FAILED (ownership still with the
    /// source) or ROLLING_BACK (already mid-verify).
    pub fn default_timeout(&self) -> Duration {
        match self {
            Self::Requested => Duration::from_secs(60),
            Self::Authorized => Duration::from_secs(2 * 60),
            Self::Freezing => Duration::from_secs(60),
            Self::Frozen => Duration::from_secs(5 * 60),
            Self::Snapshotting => Duration::from_secs(10 * 60),
            Self::Transferring => Duration::from_secs(10 * 60),
            Self::Verifying => Duration::from_secs(2 * 60),
            Self::Rehydrating => Duration::from_secs(10 * 60),
            Self::Finalizing => Duration::from_secs(2 * 60),
            // Unwinding and terminal phases are not deadline-bounded.
            Self::RollingBack | Self::Completed | Self::Aborted | Self::Failed => {
                Duration::from_secs(10 * 60)
            }
        }
    }

    /// Rough caller-facing downtime estimate while mid-migration
    pub fn estimated_downtime_ms(&self) -> u64 {
        match self {
            Self::Freezing => 5_000,
            Self::Frozen => 30_000,
            Self::Snapshotting | Self::Rehydrating => 60_000,
            Self::Transferring => 120_000,
            Self::Verifying => 30_000,
            _ => 0,
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "REQUESTED",
            Self::Authorized => "AUTHORIZED",
            Self::Freezing => "FREEZING",
            Self::Frozen => "FROZEN",
            Self::Snapshotting => "SNAPSHOTTING",
            Self::Transferring => "TRANSFERRING",
            Self::Verifying => "VERIFYING",
            Self::Rehydrating => "REHYDRATING",
            Self::Finalizing => "FINALIZING",
            Self::Completed => "COMPLETED",
            Self::RollingBack => "ROLLING_BACK",
            Self::Aborted => "ABORTED",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// Which side is currently authoritative for the agent's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnershipHolder {
    /// The node the agent is leaving
    Source,
    /// The node the agent is moving to
    Target,
}

/// Why the migration was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationReason {
    /// The agent asked to move
    AgentRequest,
    /// The orchestrator is rebalancing the fleet
    OrchestratorRebalance,
    /// The source node is shutting down
    NodeRetiring,
    /// A lease handoff requires relocation
    LeaseMigration,
    /// A security event forced relocation
    SecurityRelocation,
    /// The agent needs resources the source lacks
    ResourceNeed,
}

impl fmt::Display for MigrationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AgentRequest => "agent_request",
            Self::OrchestratorRebalance => "orchestrator_rebalance",
            Self::NodeRetiring => "node_retiring",
            Self::LeaseMigration => "lease_migration",
            Self::SecurityRelocation => "security_relocation",
            Self::ResourceNeed => "resource_need",
        };
        write!(f, "{s}")
    }
}

/// One side of a migration: node, home, and A2A endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationEndpoint {
    /// Node on this side
    pub node_id: NodeId,
    /// Home on this side
    pub home_id: HomeId,
    /// Base A2A endpoint of the node
    pub endpoint: String,
}

/// The record of one in-flight migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationTicket {
    /// Unique ticket id
    pub migration_id: MigrationId,
    /// Agent being moved
    pub agent_id: AgentId,
    /// Where the agent is leaving from
    pub source: MigrationEndpoint,
    /// Where the agent is going
    pub target: MigrationEndpoint,
    /// Current phase
    pub phase: MigrationPhase,
    /// Which side currently owns the agent's state
    pub ownership_holder: OwnershipHolder,
    /// Why the migration started
    pub reason: MigrationReason,
    /// Target-side reservation handle, if the peer issued one
    pub reservation_id: Option<String>,
    /// When each phase was entered, keyed by phase name
    pub timestamps: BTreeMap<String, DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
    /// Terminal error description, if the migration ended badly
    pub error: Option<String>,
}

impl MigrationTicket {
    /// Creates a ticket in REQUESTED with ownership at the source
    pub fn new(
        agent_id: AgentId,
        source: MigrationEndpoint,
        target: MigrationEndpoint,
        reason: MigrationReason,
    ) -> Self {
        let now = Utc::now();
        let mut timestamps = BTreeMap::new();
        timestamps.insert(MigrationPhase::Requested.to_string(), now);
        Self {
            migration_id: MigrationId::generate(),
            agent_id,
            source,
            target,
            phase: MigrationPhase::Requested,
            ownership_holder: OwnershipHolder::Source,
            reason,
            reservation_id: None,
            timestamps,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// When the given phase was entered, if it ever was
    pub fn phase_entered_at(&self, phase: MigrationPhase) -> Option<DateTime<Utc>> {
        self.timestamps.get(&phase.to_string()).copied()
    }

    /// Whether the source home was frozen at some point
    pub fn freeze_occurred(&self) -> bool {
        self.phase_entered_at(MigrationPhase::Freezing).is_some()
            || self.phase_entered_at(MigrationPhase::Frozen).is_some()
    }
}

/// Why a snapshot failed verification on the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationFailureReason {
    /// Computed digest differs from the expected one
    ChecksumMismatch,
    /// Archive size differs from the declared size
    SizeMismatch,
    /// Archive missing, truncated, or not a valid tar+gzip stream
    ArchiveCorrupt,
    /// Target refused the snapshot's base version
    BaseVersionMismatch,
    /// Target ran out of disk while staging
    DiskFull,
}

impl fmt::Display for VerificationFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ChecksumMismatch => "CHECKSUM_MISMATCH",
            Self::SizeMismatch => "SIZE_MISMATCH",
            Self::ArchiveCorrupt => "ARCHIVE_CORRUPT",
            Self::BaseVersionMismatch => "BASE_VERSION_MISMATCH",
            Self::DiskFull => "DISK_FULL",
        };
        write!(f, "{s}")
    }
}

/// Outcome of verifying a staged snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether the snapshot checked out
    pub verified: bool,
    /// Failure reason when it did not
    pub failure_reason: Option<VerificationFailureReason>,
    /// The digest the verifier computed, when it got that far
    pub computed_checksum: Option<String>,
    /// When verification finished
    pub verified_at: DateTime<Utc>,
}

impl VerificationResult {
    /// A passing result with the computed digest
    pub fn ok(computed_checksum: impl Into<String>) -> Self {
        Self {
            verified: true,
            failure_reason: None,
            computed_checksum: Some(computed_checksum.into()),
            verified_at: Utc::now(),
        }
    }

    /// A failing result
    pub fn fail(reason: VerificationFailureReason, computed_checksum: Option<String>) -> Self {
        Self {
            verified: false,
            failure_reason: Some(reason),
            computed_checksum,
            verified_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket() -> MigrationTicket {
        let agent = AgentId::try_new("worker-1".to_string()).unwrap();
        let source_node = NodeId::try_new("source-node".to_string()).unwrap();
        let target_node = NodeId::try_new("target-node".to_string()).unwrap();
        MigrationTicket::new(
            agent.clone(),
            MigrationEndpoint {
                home_id: HomeId::compose(&agent, &source_node),
                node_id: source_node,
                endpoint: "http://source:7401/flock".to_string(),
            },
            MigrationEndpoint {
                home_id: HomeId::compose(&agent, &target_node),
                node_id: target_node,
                endpoint: "http://target:7401/flock".to_string(),
            },
            MigrationReason::AgentRequest,
        )
    }

    #[test]
    fn test_should_walk_canonical_order_when_following_next_canonical() {
        let mut phase = MigrationPhase::Requested;
        let mut seen = vec![phase];
        while let Some(next) = phase.next_canonical() {
            assert!(phase.can_transition_to(next));
            phase = next;
            seen.push(phase);
        }
        assert_eq!(seen.as_slice(), MigrationPhase::CANONICAL_ORDER.as_slice());
    }

    #[test]
    fn test_should_allow_failure_from_every_non_terminal_phase() {
        for phase in MigrationPhase::ALL {
            if !phase.is_terminal() {
                assert!(
                    phase.can_transition_to(MigrationPhase::Failed),
                    "{phase} should be able to fail"
                );
            }
        }
    }

    #[test]
    fn test_should_allow_rollback_only_from_frozen_onward() {
        let can_roll_back = [
            MigrationPhase::Frozen,
            MigrationPhase::Snapshotting,
            MigrationPhase::Transferring,
            MigrationPhase::Verifying,
            MigrationPhase::Rehydrating,
            MigrationPhase::Finalizing,
        ];
        for phase in MigrationPhase::ALL {
            let expected = can_roll_back.contains(&phase);
            assert_eq!(
                phase.can_transition_to(MigrationPhase::RollingBack),
                expected,
                "rollback edge from {phase}"
            );
        }
    }

    #[test]
    fn test_should_keep_terminal_phases_closed_when_checking_table() {
        for phase in [
            MigrationPhase::Completed,
            MigrationPhase::Aborted,
            MigrationPhase::Failed,
        ] {
            assert!(phase.is_terminal());
            assert!(phase.valid_transitions().is_empty());
        }
    }

    #[test]
    fn test_should_cover_guarded_phases_when_checking_frozen_set() {
        let frozen: Vec<_> = MigrationPhase::ALL
            .iter()
            .filter(|phase| phase.is_frozen_phase())
            .copied()
            .collect();
        assert_eq!(
            frozen,
            vec![
                MigrationPhase::Freezing,
                MigrationPhase::Frozen,
                MigrationPhase::Snapshotting,
                MigrationPhase::Transferring,
                MigrationPhase::Verifying,
                MigrationPhase::Rehydrating,
            ]
        );
    }

    #[test]
    fn test_should_start_with_source_ownership_when_creating_ticket() {
        let ticket = ticket();
        assert_eq!(ticket.phase, MigrationPhase::Requested);
        assert_eq!(ticket.ownership_holder, OwnershipHolder::Source);
        assert!(ticket.phase_entered_at(MigrationPhase::Requested).is_some());
        assert!(!ticket.freeze_occurred());
    }
}
