//! Restart scenario against the simulated storage
//!
//! Time is paused, so restart waits complete instantly and deterministically.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use document_scanner_it::{LargeBinaryScenario, RestartPolicy, ScenarioConfig, ScenarioError};
use store_core::dst::{DeterministicRng, FaultConfig, FaultInjector, FaultInjectorBuilder, FaultType};
use store_core::storage::{
    CachedFieldRetriever, Entity, FieldRetriever, LargeBinaryEntity, MemorySequentialIdGenerator,
    PostgresqlAutoStorageConf, PostgresqlBasePath, SimDatabase, SimStorage, Storage, StorageError,
    StorageResult,
};
use tokio_test::{assert_err, assert_ok};

const UNIT_BYTES: usize = 1024;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

fn scenario(config: ScenarioConfig) -> LargeBinaryScenario {
    LargeBinaryScenario::new(config)
        .with_base_path_lookup(|| Some(PostgresqlBasePath::from_base("/usr/lib/postgresql/16")))
        .with_id_generator(Arc::new(MemorySequentialIdGenerator::new()))
}

fn small_config(seed: u64) -> ScenarioConfig {
    ScenarioConfig::default()
        .with_seed(seed)
        .with_payload_units(128, UNIT_BYTES)
}

/// Opens sim storages on one database; the first open is phase A, later ones phase B.
fn sim_factory(
    database: SimDatabase,
    phase_a_faults: Option<FaultInjector>,
    phase_b_faults: Option<FaultInjector>,
) -> impl FnMut(&PostgresqlAutoStorageConf) -> StorageResult<SimStorage> {
    let field_retriever: Arc<dyn FieldRetriever> = Arc::new(CachedFieldRetriever::new());
    let phase_a_faults = phase_a_faults.map(Arc::new);
    let phase_b_faults = phase_b_faults.map(Arc::new);
    let mut opened = 0u32;
    move |conf: &PostgresqlAutoStorageConf| {
        opened += 1;
        let storage = SimStorage::new(conf, database.clone(), Arc::clone(&field_retriever));
        let faults = if opened == 1 { &phase_a_faults } else { &phase_b_faults };
        Ok(match faults {
            Some(injector) => storage.with_fault_injector(Arc::clone(injector)),
            None => storage,
        })
    }
}

fn startup_window(count: u64) -> FaultInjector {
    FaultInjectorBuilder::new(DeterministicRng::new(7))
        .with_startup_window(count)
        .build()
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_with_seed_zero() {
    init_tracing();
    let database = SimDatabase::new();

    let report = assert_ok!(
        scenario(small_config(0))
            .run(sim_factory(database.clone(), None, None))
            .await
    );

    let mut reference = DeterministicRng::new(0);
    let mut expected_units = Vec::new();
    for _ in 0..20 {
        let units = reference.next_int(0, 127);
        let mut buffer = vec![0u8; units as usize * UNIT_BYTES];
        reference.fill_bytes(&mut buffer);
        expected_units.push(u32::try_from(units).unwrap());
    }
    assert_eq!(report.seed, 0);
    assert_eq!(report.payload_units, expected_units);
    assert_eq!(
        report.bytes_stored,
        expected_units.iter().map(|&u| u as u64 * UNIT_BYTES as u64).sum::<u64>()
    );
    assert_eq!(report.ids, (1..=20).collect::<Vec<i64>>());
    assert_eq!(report.restart_attempts, 1);
    assert_eq!(report.rows_queried, 20);

    assert_eq!(database.ids(LargeBinaryEntity::descriptor()), report.ids);
    let stats = database.stats();
    assert_eq!(stats.starts, 2);
    assert_eq!(stats.stores, 20);
    assert_eq!(stats.bytes_stored, report.bytes_stored);
    assert_eq!(stats.queries, 1);
    assert_eq!(stats.shutdown_calls, 2);
    assert_eq!(stats.shutdowns, 2);
    assert!(!database.is_held());
}

#[tokio::test(start_paused = true)]
async fn test_missing_postgresql_is_a_precondition() {
    let mut opened = 0u32;
    let scenario = LargeBinaryScenario::new(small_config(1)).with_base_path_lookup(|| None);

    let err = assert_err!(
        scenario
            .run(|conf: &PostgresqlAutoStorageConf| {
                opened += 1;
                Ok(SimStorage::new(
                    conf,
                    SimDatabase::new(),
                    Arc::new(CachedFieldRetriever::new()),
                ))
            })
            .await
    );

    match err {
        ScenarioError::Precondition { message } => {
            assert!(message.contains("/usr/lib/postgresql/<version>"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(opened, 0);
}

#[tokio::test(start_paused = true)]
async fn test_same_seed_same_sizes() {
    let a = scenario(small_config(99))
        .run(sim_factory(SimDatabase::new(), None, None))
        .await
        .unwrap();
    let b = scenario(small_config(99))
        .run(sim_factory(SimDatabase::new(), None, None))
        .await
        .unwrap();
    let c = scenario(small_config(100))
        .run(sim_factory(SimDatabase::new(), None, None))
        .await
        .unwrap();

    assert_eq!(a.payload_units, b.payload_units);
    assert_eq!(a.bytes_stored, b.bytes_stored);
    assert_ne!(a.payload_units, c.payload_units);
}

#[tokio::test(start_paused = true)]
async fn test_payload_bounds_and_distinct_ids() {
    let report = scenario(small_config(5))
        .run(sim_factory(SimDatabase::new(), None, None))
        .await
        .unwrap();

    assert_eq!(report.payload_units.len(), 20);
    assert!(report.payload_units.iter().all(|&units| units < 128));
    let ids: HashSet<i64> = report.ids.iter().copied().collect();
    assert_eq!(ids.len(), 20);
}

#[tokio::test(start_paused = true)]
async fn test_probe_waits_out_startup() {
    let database = SimDatabase::new();
    let started = tokio::time::Instant::now();

    let report = scenario(small_config(3))
        .run(sim_factory(database.clone(), None, Some(startup_window(4))))
        .await
        .unwrap();

    assert_eq!(report.restart_attempts, 5);
    assert_eq!(report.rows_queried, 20);
    assert_eq!(database.stats().start_attempts, 6);
    assert!(started.elapsed() < Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn test_short_fixed_delay_fails_while_starting_up() {
    let database = SimDatabase::new();
    let config = small_config(3).with_restart_policy(RestartPolicy::FixedDelay(Duration::from_secs(10)));

    let err = scenario(config)
        .run(sim_factory(database.clone(), None, Some(startup_window(1))))
        .await
        .unwrap_err();

    match &err {
        ScenarioError::Storage(storage_err @ StorageError::StartingUp { .. }) => {
            assert!(storage_err.is_transient());
        }
        other => panic!("unexpected error: {other}"),
    }
    // Phase A shutdown plus cleanup of the unstarted phase B handle
    assert_eq!(database.stats().shutdown_calls, 2);
    assert!(!database.is_held());
}

#[tokio::test(start_paused = true)]
async fn test_probe_deadline_exhausted() {
    let database = SimDatabase::new();

    let err = scenario(small_config(3))
        .run(sim_factory(database.clone(), None, Some(startup_window(1000))))
        .await
        .unwrap_err();

    assert!(matches!(err, ScenarioError::RestartDeadline { deadline_ms: 20_000, .. }));
    assert_eq!(database.stats().queries, 0);
    assert_eq!(database.stats().shutdown_calls, 2);
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_restart_wait() {
    let database = SimDatabase::new();
    let started = tokio::time::Instant::now();

    let err = scenario(small_config(3))
        .run_until(
            sim_factory(database.clone(), None, Some(startup_window(1000))),
            tokio::time::sleep(Duration::from_secs(3)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ScenarioError::Interrupted));
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(database.stats().queries, 0);
    assert_eq!(database.stats().shutdown_calls, 2);
    assert!(!database.is_held());
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_shuts_down_once() {
    let database = SimDatabase::new();
    let write_fault = FaultInjectorBuilder::new(DeterministicRng::new(11))
        .with_fault(FaultConfig::new(FaultType::StorageWriteFail, 1.0).with_filter("store"))
        .build();

    let err = scenario(small_config(3))
        .run(sim_factory(database.clone(), Some(write_fault), None))
        .await
        .unwrap_err();

    assert!(matches!(err, ScenarioError::Storage(StorageError::SimulatedFault { .. })));
    let stats = database.stats();
    assert_eq!(stats.stores, 0);
    assert_eq!(stats.shutdown_calls, 1);
    assert_eq!(stats.shutdowns, 1);
    assert!(!database.is_held());
}

#[tokio::test(start_paused = true)]
async fn test_zero_byte_entities() {
    let database = SimDatabase::new();
    let config = ScenarioConfig::default()
        .with_seed(8)
        .with_payload_units(1, UNIT_BYTES);

    let report = scenario(config)
        .run(sim_factory(database.clone(), None, None))
        .await
        .unwrap();

    assert!(report.payload_units.iter().all(|&units| units == 0));
    assert_eq!(report.bytes_stored, 0);
    assert_eq!(report.rows_queried, 20);

    let conf = PostgresqlAutoStorageConf::builder(PostgresqlBasePath::from_base("/sim"))
        .managed_entity(LargeBinaryEntity::descriptor())
        .username("u")
        .password("p")
        .database_name("d")
        .scheme_checksum_file("/sim/checksum")
        .database_dir("/sim/db")
        .build()
        .unwrap();
    let mut reopened = SimStorage::new(&conf, database, Arc::new(CachedFieldRetriever::new()));
    reopened.start().await.unwrap();
    let rows: Vec<LargeBinaryEntity> = reopened.run_query_all().await.unwrap();
    reopened.shutdown().await.unwrap();

    assert_eq!(rows.len(), 20);
    assert!(rows.iter().all(|row| row.payload_len() == 0));
}

#[tokio::test(start_paused = true)]
async fn test_seed_from_environment() {
    std::env::set_var("LARGE_BINARY_IT_SEED", "1234");
    let config = ScenarioConfig::default().with_payload_units(128, UNIT_BYTES);
    let report = scenario(config.clone())
        .run(sim_factory(SimDatabase::new(), None, None))
        .await;

    std::env::set_var("LARGE_BINARY_IT_SEED", "not-a-seed");
    let invalid = scenario(config)
        .run(sim_factory(SimDatabase::new(), None, None))
        .await;
    std::env::remove_var("LARGE_BINARY_IT_SEED");

    assert_eq!(report.unwrap().seed, 1234);
    assert!(matches!(invalid, Err(ScenarioError::Precondition { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_failed_shutdown_is_retried_by_cleanup() {
    let database = SimDatabase::new();
    let shutdown_fault = FaultInjectorBuilder::new(DeterministicRng::new(13))
        .with_fault(
            FaultConfig::new(FaultType::DbShutdownFail, 1.0)
                .with_filter("shutdown")
                .with_max_injections(1),
        )
        .build();
    let mut opened = 0u32;
    let mut factory = sim_factory(database.clone(), Some(shutdown_fault), None);

    let err = scenario(small_config(3))
        .run(|conf: &PostgresqlAutoStorageConf| {
            opened += 1;
            factory(conf)
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ScenarioError::Storage(StorageError::SimulatedFault { .. })));
    assert_eq!(opened, 1);
    let stats = database.stats();
    assert_eq!(stats.stores, 20);
    assert_eq!(stats.shutdown_calls, 2);
    assert_eq!(stats.shutdowns, 1);
    assert!(!database.is_held());
}

#[tokio::test(start_paused = true)]
async fn test_query_failure_after_restart_shuts_down_once() {
    let database = SimDatabase::new();
    let read_fault = FaultInjectorBuilder::new(DeterministicRng::new(17))
        .with_fault(FaultConfig::new(FaultType::StorageReadFail, 1.0).with_filter("query"))
        .build();

    let err = scenario(small_config(3))
        .run(sim_factory(database.clone(), None, Some(read_fault)))
        .await
        .unwrap_err();

    assert!(matches!(err, ScenarioError::Storage(StorageError::SimulatedFault { .. })));
    let stats = database.stats();
    assert_eq!(stats.starts, 2);
    assert_eq!(stats.queries, 0);
    assert_eq!(stats.shutdown_calls, 2);
    assert_eq!(stats.shutdowns, 2);
    assert!(!database.is_held());
}
