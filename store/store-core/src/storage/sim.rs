//! SimStorage - In-Memory Storage for Testing
//!
//! TigerStyle: Deterministic testing with fault injection.
//!
//! # Simulation-First
//!
//! A [`SimDatabase`] plays the role of the data directory: it outlives the
//! [`SimStorage`] handles opened against it, so a shutdown followed by a new
//! instance sees the same rows. Only one handle may hold it at a time.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::dst::{FaultInjector, FaultType};

use super::backend::Storage;
use super::conf::PostgresqlAutoStorageConf;
use super::entity::{Entity, EntityDescriptor, FieldValue, FieldValues};
use super::error::{StorageError, StorageResult};
use super::field::FieldRetriever;

// =============================================================================
// SimDatabase
// =============================================================================

/// Lifecycle and traffic counters of a [`SimDatabase`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimDatabaseStats {
    /// Calls to `start` on started or unstarted handles
    pub start_attempts: u64,
    /// Successful transitions to started
    pub starts: u64,
    /// Calls to `shutdown`, including no-op calls
    pub shutdown_calls: u64,
    /// Shutdowns that released the database
    pub shutdowns: u64,
    /// Rows inserted
    pub stores: u64,
    /// Payload bytes inserted
    pub bytes_stored: u64,
    /// Completed `run_query_all` calls
    pub queries: u64,
}

#[derive(Debug, Default)]
struct SimDatabaseState {
    tables: HashMap<&'static str, BTreeMap<i64, FieldValues>>,
    holder: Option<u64>,
    next_handle: u64,
    stats: SimDatabaseStats,
}

/// Shared in-memory database; clones refer to the same data.
#[derive(Debug, Clone, Default)]
pub struct SimDatabase {
    state: Arc<Mutex<SimDatabaseState>>,
}

impl SimDatabase {
    /// Create an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimDatabaseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> SimDatabaseStats {
        self.lock().stats
    }

    /// Identifiers stored for an entity type, ascending.
    #[must_use]
    pub fn ids(&self, descriptor: &EntityDescriptor) -> Vec<i64> {
        self.lock()
            .tables
            .get(descriptor.name)
            .map(|rows| rows.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Whether a handle currently holds the database.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.lock().holder.is_some()
    }
}

// =============================================================================
// SimStorage
// =============================================================================

/// In-memory [`Storage`] for testing.
///
/// TigerStyle:
/// - Same contract as `PostgresqlAutoStorage`
/// - Fault injection via `FaultInjector` on operations
///   `start`, `store`, `query`, `shutdown`
pub struct SimStorage {
    database: SimDatabase,
    entities: Vec<&'static EntityDescriptor>,
    field_retriever: Arc<dyn FieldRetriever>,
    fault_injector: Arc<FaultInjector>,
    handle: Option<u64>,
}

impl std::fmt::Debug for SimStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimStorage")
            .field("entities", &self.entities.len())
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl SimStorage {
    /// Create a handle on `database` managing the entities of `conf`.
    #[must_use]
    pub fn new(
        conf: &PostgresqlAutoStorageConf,
        database: SimDatabase,
        field_retriever: Arc<dyn FieldRetriever>,
    ) -> Self {
        Self {
            database,
            entities: conf.entities().to_vec(),
            field_retriever,
            fault_injector: Arc::new(FaultInjector::disabled()),
            handle: None,
        }
    }

    /// Use a shared fault injector.
    #[must_use]
    pub fn with_fault_injector(mut self, fault_injector: Arc<FaultInjector>) -> Self {
        self.fault_injector = fault_injector;
        self
    }

    /// Check if a fault should be injected for an operation.
    fn maybe_inject_fault(&self, operation: &str) -> StorageResult<()> {
        match self.fault_injector.should_inject(operation) {
            None => Ok(()),
            Some(FaultType::DbStartingUp) => Err(StorageError::connection(
                "FATAL: the database system is starting up",
            )),
            Some(FaultType::DbConnectionFail) => {
                Err(StorageError::connection("connection refused"))
            }
            Some(fault_type) => Err(StorageError::simulated_fault(format!(
                "{} during {operation}",
                fault_type.as_str()
            ))),
        }
    }

    fn check_managed(&self, descriptor: &EntityDescriptor) -> StorageResult<()> {
        if self.handle.is_none() {
            return Err(StorageError::NotStarted);
        }
        if self.entities.iter().any(|managed| managed.name == descriptor.name) {
            Ok(())
        } else {
            Err(StorageError::validation(format!(
                "entity {} is not managed by this storage",
                descriptor.name
            )))
        }
    }
}

#[async_trait]
impl Storage for SimStorage {
    #[tracing::instrument(skip(self))]
    async fn start(&mut self) -> StorageResult<()> {
        self.database.lock().stats.start_attempts += 1;
        if self.handle.is_some() {
            return Ok(());
        }
        self.maybe_inject_fault("start")?;

        let mut state = self.database.lock();
        if state.holder.is_some() {
            return Err(StorageError::creation(
                "database directory is in use by another instance",
            ));
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.holder = Some(handle);
        state.stats.starts += 1;
        for descriptor in &self.entities {
            state.tables.entry(descriptor.name).or_default();
        }
        drop(state);

        self.handle = Some(handle);
        tracing::debug!(handle, "sim storage started");
        Ok(())
    }

    async fn store<E: Entity>(&self, entity: &E) -> StorageResult<()> {
        let descriptor = E::descriptor();
        self.check_managed(descriptor)?;
        let id = entity
            .id()
            .ok_or_else(|| StorageError::validation("entity has no id assigned"))?;
        self.maybe_inject_fault("store")?;

        let fields = self.field_retriever.relevant_fields(descriptor);
        let mut values = FieldValues::new();
        let mut payload_bytes = 0u64;
        for field in fields.iter() {
            let value = entity.field_value(field.name).ok_or_else(|| {
                StorageError::validation(format!("entity has no value for {}", field.name))
            })?;
            if let FieldValue::Bytea(bytes) = &value {
                payload_bytes += bytes.len() as u64;
            }
            values.push(field.name, value);
        }

        let mut state = self.database.lock();
        let table = state.tables.entry(descriptor.name).or_default();
        if table.contains_key(&id) {
            return Err(StorageError::write(format!(
                "duplicate key value violates unique constraint: id={id}"
            )));
        }
        table.insert(id, values);
        state.stats.stores += 1;
        state.stats.bytes_stored += payload_bytes;
        Ok(())
    }

    async fn run_query_all<E: Entity>(&self) -> StorageResult<Vec<E>> {
        let descriptor = E::descriptor();
        self.check_managed(descriptor)?;
        self.maybe_inject_fault("query")?;

        let rows: Vec<FieldValues> = {
            let state = self.database.lock();
            state
                .tables
                .get(descriptor.name)
                .map(|rows| rows.values().cloned().collect())
                .unwrap_or_default()
        };
        let entities = rows
            .into_iter()
            .map(E::from_fields)
            .collect::<StorageResult<Vec<E>>>()?;

        self.database.lock().stats.queries += 1;
        Ok(entities)
    }

    #[tracing::instrument(skip(self))]
    async fn shutdown(&mut self) -> StorageResult<()> {
        self.database.lock().stats.shutdown_calls += 1;
        let Some(handle) = self.handle else {
            return Ok(());
        };
        self.maybe_inject_fault("shutdown")?;

        let mut state = self.database.lock();
        if state.holder == Some(handle) {
            state.holder = None;
        }
        state.stats.shutdowns += 1;
        drop(state);

        self.handle = None;
        tracing::debug!(handle, "sim storage shut down");
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.handle.is_some()
    }
}
