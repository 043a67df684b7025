//! Scenario - Large binary storage across a restart
//!
//! TigerStyle: Fixed sequence, explicit errors, at most one live storage.
//!
//! # Sequence
//!
//! ```text
//! base path → seed → scratch paths → conf
//!   │
//!   ├─ phase A: start → {payload → id → store} × N → shutdown
//!   │
//!   ├─ restart: probe `start` on a fresh instance (interruptible)
//!   │
//!   └─ phase B: run_query_all → cleanup shutdown
//! ```

use std::future::Future;
use std::sync::Arc;

use store_core::constants::ENTITY_PAYLOAD_BYTES_MAX;
use store_core::dst::DeterministicRng;
use store_core::storage::{
    CachedFieldRetriever, Entity, FieldRetriever, IdGenerator, LargeBinaryEntity,
    MemorySequentialIdGenerator, PostgresqlAutoStorage, PostgresqlAutoStorageConf,
    PostgresqlBasePath, Storage, StorageResult,
};

use crate::constants::{
    PERSISTENCE_UNIT_NAME, SCENARIO_ENTITY_COUNT_DEFAULT, SCENARIO_ENTITY_COUNT_MAX,
    SCENARIO_PAYLOAD_UNITS_MAX, SCENARIO_PAYLOAD_UNIT_BYTES_DEFAULT, STORAGE_PARALLEL_QUERY_COUNT,
};
use crate::error::{ScenarioError, ScenarioResult};
use crate::restart::RestartPolicy;
use crate::setup::{self, ScratchPaths};
use crate::workload::PayloadGenerator;

const MISSING_POSTGRESQL_MESSAGE: &str = "no PostgreSQL installation found: only systems \
     providing binaries in /usr/lib/postgresql/<version>/bin are supported \
     (DOCUMENT_SCANNER_POSTGRESQL_BASE_DIR overrides the location)";

// =============================================================================
// Configuration
// =============================================================================

/// Workload shape and restart behavior of a scenario run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioConfig {
    /// Entities stored before the restart
    pub entity_count: u32,
    /// Payload sizes are drawn from `0..payload_units_max`
    pub payload_units_max: u32,
    /// Bytes per payload unit
    pub payload_unit_bytes: usize,
    /// Fixed seed; otherwise the environment override or the wall clock
    pub seed: Option<u64>,
    /// How the storage is brought back after the shutdown
    pub restart_policy: RestartPolicy,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            entity_count: SCENARIO_ENTITY_COUNT_DEFAULT,
            payload_units_max: SCENARIO_PAYLOAD_UNITS_MAX,
            payload_unit_bytes: SCENARIO_PAYLOAD_UNIT_BYTES_DEFAULT,
            seed: None,
            restart_policy: RestartPolicy::default(),
        }
    }
}

impl ScenarioConfig {
    /// Replay with a fixed seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Store `count` entities.
    #[must_use]
    pub fn with_entity_count(mut self, count: u32) -> Self {
        self.entity_count = count;
        self
    }

    /// Draw payload sizes in `0..units_max` units of `unit_bytes`.
    #[must_use]
    pub fn with_payload_units(mut self, units_max: u32, unit_bytes: usize) -> Self {
        self.payload_units_max = units_max;
        self.payload_unit_bytes = unit_bytes;
        self
    }

    /// Bring the storage back with `policy`.
    #[must_use]
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    fn assert_valid(&self) {
        assert!(
            (1..=SCENARIO_ENTITY_COUNT_MAX).contains(&self.entity_count),
            "entity count {} not in 1..={SCENARIO_ENTITY_COUNT_MAX}",
            self.entity_count
        );
        assert!(self.payload_units_max > 0, "payload_units_max must be positive");
        assert!(self.payload_unit_bytes > 0, "payload_unit_bytes must be positive");
        assert!(
            (self.payload_units_max as usize - 1).saturating_mul(self.payload_unit_bytes)
                <= ENTITY_PAYLOAD_BYTES_MAX,
            "largest payload exceeds {ENTITY_PAYLOAD_BYTES_MAX} bytes"
        );
    }
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    /// Seed the workload was generated from
    pub seed: u64,
    /// Drawn payload sizes in units, in store order
    pub payload_units: Vec<u32>,
    /// Identifiers assigned, in store order
    pub ids: Vec<i64>,
    /// Total payload bytes stored
    pub bytes_stored: u64,
    /// `start` attempts the restart needed
    pub restart_attempts: u32,
    /// Entities returned by the query after the restart
    pub rows_queried: usize,
}

// =============================================================================
// Scenario
// =============================================================================

type BasePathLookup = Box<dyn Fn() -> Option<PostgresqlBasePath> + Send + Sync>;

/// Stores large binaries, restarts the storage and queries everything back.
pub struct LargeBinaryScenario {
    config: ScenarioConfig,
    base_path_lookup: BasePathLookup,
    id_generator: Arc<dyn IdGenerator>,
}

impl std::fmt::Debug for LargeBinaryScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LargeBinaryScenario")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LargeBinaryScenario {
    /// Create a scenario using the system PostgreSQL lookup and the
    /// process-wide identifier sequence.
    ///
    /// # Panics
    /// Panics if `config` describes an empty or oversized workload.
    #[must_use]
    pub fn new(config: ScenarioConfig) -> Self {
        config.assert_valid();
        Self {
            config,
            base_path_lookup: Box::new(
                PostgresqlAutoStorageConf::find_best_initial_postgresql_base_path,
            ),
            id_generator: Arc::new(MemorySequentialIdGenerator::global()),
        }
    }

    /// Replace the PostgreSQL installation lookup.
    #[must_use]
    pub fn with_base_path_lookup(
        mut self,
        lookup: impl Fn() -> Option<PostgresqlBasePath> + Send + Sync + 'static,
    ) -> Self {
        self.base_path_lookup = Box::new(lookup);
        self
    }

    /// Replace the identifier generator.
    #[must_use]
    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    /// The workload configuration.
    #[must_use]
    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Run to completion; `factory` opens a storage for the configuration.
    ///
    /// # Errors
    /// See [`LargeBinaryScenario::run_until`].
    pub async fn run<S, F>(&self, factory: F) -> ScenarioResult<ScenarioReport>
    where
        S: Storage,
        F: FnMut(&PostgresqlAutoStorageConf) -> StorageResult<S>,
    {
        self.run_until(factory, std::future::pending()).await
    }

    /// Run until done or until `interrupt` completes during the restart wait.
    ///
    /// The interrupt is observed between restart attempts. A `start` in
    /// flight always runs to completion.
    ///
    /// A storage left live by any exit path gets one cleanup shutdown.
    ///
    /// # Errors
    /// - `ScenarioError::Precondition` if no PostgreSQL installation is found
    /// - `ScenarioError::Io` if scratch paths cannot be reserved
    /// - `ScenarioError::Storage` for any storage lifecycle failure
    /// - `ScenarioError::Interrupted` if `interrupt` completes first
    /// - `ScenarioError::RestartDeadline` if the storage does not come back
    pub async fn run_until<S, F, I>(&self, mut factory: F, interrupt: I) -> ScenarioResult<ScenarioReport>
    where
        S: Storage,
        F: FnMut(&PostgresqlAutoStorageConf) -> StorageResult<S>,
        I: Future<Output = ()>,
    {
        let mut live: Option<S> = None;
        let result = self.drive(&mut factory, interrupt, &mut live).await;

        if let Some(mut storage) = live.take() {
            match (&result, storage.shutdown().await) {
                (_, Ok(())) => {}
                (Ok(_), Err(e)) => return Err(e.into()),
                (Err(_), Err(e)) => tracing::error!(error = %e, "cleanup shutdown failed"),
            }
        }

        match &result {
            Ok(report) => tracing::info!(
                seed = report.seed,
                entities = report.ids.len(),
                bytes_stored = report.bytes_stored,
                rows_queried = report.rows_queried,
                "scenario complete"
            ),
            Err(e) => tracing::error!(error = %e, "scenario failed"),
        }
        result
    }

    async fn drive<S, F, I>(
        &self,
        factory: &mut F,
        interrupt: I,
        live: &mut Option<S>,
    ) -> ScenarioResult<ScenarioReport>
    where
        S: Storage,
        F: FnMut(&PostgresqlAutoStorageConf) -> StorageResult<S>,
        I: Future<Output = ()>,
    {
        let base_path =
            (self.base_path_lookup)().ok_or_else(|| ScenarioError::precondition(MISSING_POSTGRESQL_MESSAGE))?;
        let seed = match self.config.seed {
            Some(seed) => seed,
            None => setup::seed_from_env()?.unwrap_or_else(setup::wall_clock_seed),
        };
        let scratch = ScratchPaths::reserve()?;
        let conf = setup::storage_conf(base_path, &scratch)?;

        // Phase A
        let storage = live.insert(factory(&conf)?);
        storage.start().await?;

        tracing::info!(seed, "random seed");
        let mut generator = PayloadGenerator::new(
            DeterministicRng::new(seed),
            self.config.payload_units_max,
            self.config.payload_unit_bytes,
        );
        let mut payload_units = Vec::with_capacity(self.config.entity_count as usize);
        let mut ids = Vec::with_capacity(self.config.entity_count as usize);
        let mut bytes_stored = 0u64;
        for iteration in 0..self.config.entity_count {
            let payload = generator.next_payload();
            tracing::info!(iteration, size_units = payload.units, "generated payload");

            let bytes = payload.data.len();
            let mut entity = LargeBinaryEntity::new(payload.data);
            let id = self.id_generator.next_id(&entity);
            entity.set_id(id);
            storage.store(&entity).await?;
            tracing::info!(iteration, id, bytes, "stored entity");

            payload_units.push(payload.units);
            ids.push(id);
            bytes_stored += bytes as u64;
        }

        // A failed shutdown leaves the handle live for the cleanup to retry
        if let Some(storage) = live.as_mut() {
            storage.shutdown().await?;
        }
        live.take();
        tracing::info!("storage shut down");

        // Restart: the interrupt only cuts the waits between attempts
        let storage = live.insert(factory(&conf)?);
        let restart_attempts = self
            .config
            .restart_policy
            .start_until(storage, interrupt)
            .await?;

        // Phase B
        tracing::info!("querying all entities");
        let rows: Vec<LargeBinaryEntity> = storage.run_query_all().await?;
        tracing::info!(rows = rows.len(), "query complete");

        // Postcondition
        assert_eq!(ids.len(), self.config.entity_count as usize);

        Ok(ScenarioReport {
            seed,
            payload_units,
            ids,
            bytes_stored,
            restart_attempts,
            rows_queried: rows.len(),
        })
    }
}

/// Storage factory opening [`PostgresqlAutoStorage`] instances that share one
/// field retriever.
pub fn postgresql_storage_factory(
) -> impl FnMut(&PostgresqlAutoStorageConf) -> StorageResult<PostgresqlAutoStorage> {
    let field_retriever: Arc<dyn FieldRetriever> = Arc::new(CachedFieldRetriever::new());
    move |conf: &PostgresqlAutoStorageConf| {
        Ok(PostgresqlAutoStorage::new(
            conf.clone(),
            PERSISTENCE_UNIT_NAME,
            STORAGE_PARALLEL_QUERY_COUNT,
            Arc::clone(&field_retriever),
        ))
    }
}
