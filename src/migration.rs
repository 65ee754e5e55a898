//! Live migration engine
//!
//! Moves one agent's on-disk home between nodes while preserving state:
//! a per-migration ticket FSM with strict transition rules, snapshot and
//! checksum transfer, rehydration with path-traversal defense, automatic
//! rollback, and a frozen guard that fails messages to agents
//! mid-migration.

pub mod engine;
pub mod orchestrator;
pub mod rehydrate;
pub mod retry;
pub mod snapshot;
pub mod ticket_store;
pub mod transport;
pub mod workstate;

pub use engine::{FrozenGuardDecision, MigrationEngine};
pub use orchestrator::{MigrationOrchestrator, MigrationOutcome};
pub use rehydrate::{MigrationPayload, PortableArchive, RehydrateResult};
pub use retry::{RETRY_LOCAL, RETRY_NETWORK, RetryPolicy, retry_policy_for, with_retry};
pub use snapshot::{MAX_PORTABLE_SIZE_BYTES, Snapshot, compute_sha256, create_snapshot, verify_snapshot};
pub use ticket_store::{TicketFilter, TicketStore, TicketUpdate};
pub use transport::{
    HttpMigrationTransport, InProcessTransport, MigrationRequestParams, MigrationRpcHandler,
    MigrationTargetService, MigrationTransport, RehydrateParams, RequestAck, RunParams,
    TransferRequest,
};
pub use workstate::{ProjectState, WorkStateManifest};
