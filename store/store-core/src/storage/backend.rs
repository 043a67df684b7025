//! Storage Trait
//!
//! TigerStyle: Abstract interface for entity storage.
//!
//! # Simulation-First
//!
//! Scenarios are written against `SimStorage` before `PostgresqlAutoStorage`.
//! All implementations must satisfy the same trait contract.

use async_trait::async_trait;

use super::entity::Entity;
use super::error::StorageResult;

/// Persistence facade with an explicit lifecycle.
///
/// TigerStyle: All operations are async, return explicit errors.
///
/// Lifecycle: `start` → any number of `store` / `run_query_all` → `shutdown`.
/// Shut down instances may be started again, but a fresh instance against
/// the same configuration is the usual way back.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Provision or attach to the underlying database.
    ///
    /// Idempotent: calling `start` on a started instance does nothing. A
    /// failed `start` may be retried on the same instance; errors for which
    /// [`StorageError::is_transient`](super::StorageError::is_transient)
    /// holds are expected to clear on their own.
    async fn start(&mut self) -> StorageResult<()>;

    /// Persist one entity whose identifier is already assigned.
    async fn store<E: Entity>(&self, entity: &E) -> StorageResult<()>;

    /// All persisted entities of type `E`, ordered by identifier.
    async fn run_query_all<E: Entity>(&self) -> StorageResult<Vec<E>>;

    /// Release connections, memory and child processes.
    ///
    /// Idempotent. After return the data is recoverable by a new instance.
    async fn shutdown(&mut self) -> StorageResult<()>;

    /// Whether `start` has completed and `shutdown` has not been called.
    fn is_started(&self) -> bool;
}
