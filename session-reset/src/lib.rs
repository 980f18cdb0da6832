//! Session Reset Library
//!
//! Coordinates the "clear all data" flow of the field worker client: a
//! two-trigger confirmation gate, best-effort backend teardown, selective
//! local purge, and process-wide invalidation signals.

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod file_store;
pub mod gate;
pub mod logging;
pub mod purge;
pub mod remote;
pub mod secret;
pub mod storage;

// Re-export commonly used types
pub use bus::{InvalidationBroadcaster, InvalidationBus, InvalidationEvent, Subscription};
pub use config::ResetConfig;
pub use coordinator::{ResetCoordinator, ResetOutcome, ResetPhase, ResetReport};
pub use error::{PurgeError, ResetError, StorageError, TeardownError};
pub use gate::{ConfirmationGate, GateDecision};
pub use purge::{LocalPurger, PreservationAllowlist};
pub use remote::{HttpTeardownBackend, RemoteTeardown, TeardownBackend, TeardownReport};
pub use storage::{LocalCache, SecureStorage, SessionIdentity, WorkerId};
