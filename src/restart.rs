//! Restart - Waiting for a restarted storage to accept `start`
//!
//! TigerStyle: The wait is bounded. Only transient errors are retried.
//! An interrupt ends the wait between attempts, never an attempt itself.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use store_core::storage::Storage;
use tokio::time::Instant;

use crate::constants::{RESTART_DEADLINE_MS_DEFAULT, RESTART_PROBE_INTERVAL_MS_DEFAULT};
use crate::error::{ScenarioError, ScenarioResult};

/// How the scenario brings the storage back after a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Call `start` until it succeeds, pausing `interval` after each
    /// transient failure, and give up once `deadline` has elapsed.
    Probe {
        /// Total time allowed for the storage to come back
        deadline: Duration,
        /// Pause between attempts
        interval: Duration,
    },
    /// Sleep once, then call `start` a single time.
    FixedDelay(Duration),
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::Probe {
            deadline: Duration::from_millis(RESTART_DEADLINE_MS_DEFAULT),
            interval: Duration::from_millis(RESTART_PROBE_INTERVAL_MS_DEFAULT),
        }
    }
}

impl RestartPolicy {
    /// Start `storage` according to this policy.
    ///
    /// Returns the number of `start` attempts made.
    ///
    /// # Errors
    /// Returns `ScenarioError::RestartDeadline` when probing runs out of time,
    /// `ScenarioError::Storage` for any non-transient failure or for the
    /// failure of a fixed-delay start.
    ///
    /// # Panics
    /// Panics if a probe interval is zero or longer than its deadline.
    pub async fn start<S: Storage>(&self, storage: &mut S) -> ScenarioResult<u32> {
        self.start_until(storage, std::future::pending()).await
    }

    /// Like [`RestartPolicy::start`], but gives up with
    /// `ScenarioError::Interrupted` once `interrupt` completes during a wait.
    ///
    /// A `start` attempt already running is always awaited to completion.
    ///
    /// # Errors
    /// See [`RestartPolicy::start`], plus `ScenarioError::Interrupted`.
    ///
    /// # Panics
    /// Panics if a probe interval is zero or longer than its deadline.
    pub async fn start_until<S, I>(&self, storage: &mut S, interrupt: I) -> ScenarioResult<u32>
    where
        S: Storage,
        I: Future<Output = ()>,
    {
        tokio::pin!(interrupt);
        match *self {
            Self::FixedDelay(delay) => {
                tracing::info!(delay_ms = delay.as_millis() as u64, "waiting before restart");
                wait(delay, interrupt.as_mut()).await?;
                storage.start().await?;
                Ok(1)
            }
            Self::Probe { deadline, interval } => probe(storage, deadline, interval, interrupt).await,
        }
    }
}

/// Sleep for `duration` unless `interrupt` completes first.
async fn wait<I: Future<Output = ()>>(duration: Duration, interrupt: Pin<&mut I>) -> ScenarioResult<()> {
    tokio::select! {
        biased;
        () = interrupt => {
            tracing::warn!("restart wait interrupted");
            Err(ScenarioError::Interrupted)
        }
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

async fn probe<S, I>(
    storage: &mut S,
    deadline: Duration,
    interval: Duration,
    mut interrupt: Pin<&mut I>,
) -> ScenarioResult<u32>
where
    S: Storage,
    I: Future<Output = ()>,
{
    // Preconditions
    assert!(!interval.is_zero(), "probe interval must be positive");
    assert!(interval <= deadline, "probe interval must not exceed the deadline");

    let deadline_at = Instant::now() + deadline;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match storage.start().await {
            Ok(()) => {
                tracing::info!(attempts, "storage restarted");
                return Ok(attempts);
            }
            Err(e) if e.is_transient() => {
                if Instant::now() + interval > deadline_at {
                    return Err(ScenarioError::RestartDeadline {
                        deadline_ms: deadline.as_millis() as u64,
                        last_error: e.to_string(),
                    });
                }
                tracing::debug!(attempts, error = %e, "storage not ready, retrying");
                wait(interval, interrupt.as_mut()).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use store_core::dst::{DeterministicRng, FaultConfig, FaultInjectorBuilder, FaultType};
    use store_core::storage::{
        CachedFieldRetriever, Entity, LargeBinaryEntity, PostgresqlAutoStorageConf,
        PostgresqlBasePath, SimDatabase, SimStorage, StorageError, StorageResult,
    };

    fn storage(builder: FaultInjectorBuilder) -> SimStorage {
        let conf = PostgresqlAutoStorageConf::builder(PostgresqlBasePath::from_base("/sim"))
            .managed_entity(LargeBinaryEntity::descriptor())
            .username("u")
            .password("p")
            .database_name("d")
            .scheme_checksum_file("/sim/checksum")
            .database_dir("/sim/db")
            .build()
            .unwrap();
        SimStorage::new(&conf, SimDatabase::new(), Arc::new(CachedFieldRetriever::new()))
            .with_fault_injector(Arc::new(builder.build()))
    }

    fn builder() -> FaultInjectorBuilder {
        FaultInjectorBuilder::new(DeterministicRng::new(42))
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_outlasts_startup_window() {
        let mut storage = storage(builder().with_startup_window(5));
        let started = Instant::now();

        let attempts = RestartPolicy::default().start(&mut storage).await.unwrap();

        assert_eq!(attempts, 6);
        assert!(storage.is_started());
        assert_eq!(started.elapsed(), Duration::from_millis(5 * RESTART_PROBE_INTERVAL_MS_DEFAULT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_gives_up_at_deadline() {
        let mut storage = storage(builder().with_startup_window(1000));
        let policy = RestartPolicy::Probe {
            deadline: Duration::from_secs(2),
            interval: Duration::from_millis(500),
        };

        let err = policy.start(&mut storage).await.unwrap_err();

        match err {
            ScenarioError::RestartDeadline { deadline_ms, last_error } => {
                assert_eq!(deadline_ms, 2000);
                assert!(last_error.contains("starting up"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!storage.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_does_not_retry_permanent_errors() {
        let mut storage = storage(builder().with_fault(
            FaultConfig::new(FaultType::StorageReadFail, 1.0).with_filter("start"),
        ));

        let err = RestartPolicy::default().start(&mut storage).await.unwrap_err();

        assert!(matches!(err, ScenarioError::Storage(StorageError::SimulatedFault { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_fails_while_starting_up() {
        let mut storage = storage(builder().with_startup_window(1));
        let started = Instant::now();

        let err = RestartPolicy::FixedDelay(Duration::from_secs(10))
            .start(&mut storage)
            .await
            .unwrap_err();

        assert!(matches!(err, ScenarioError::Storage(StorageError::StartingUp { .. })));
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_starts_ready_storage() {
        let mut storage = storage(builder());
        let attempts = RestartPolicy::FixedDelay(Duration::from_secs(20))
            .start(&mut storage)
            .await
            .unwrap();
        assert_eq!(attempts, 1);
    }

    /// Delegates to a sim storage after a slow `start`.
    struct SlowStart {
        inner: SimStorage,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Storage for SlowStart {
        async fn start(&mut self) -> StorageResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.start().await
        }

        async fn store<E: Entity>(&self, entity: &E) -> StorageResult<()> {
            self.inner.store(entity).await
        }

        async fn run_query_all<E: Entity>(&self) -> StorageResult<Vec<E>> {
            self.inner.run_query_all().await
        }

        async fn shutdown(&mut self) -> StorageResult<()> {
            self.inner.shutdown().await
        }

        fn is_started(&self) -> bool {
            self.inner.is_started()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_ends_probe_between_attempts() {
        let mut storage = storage(builder().with_startup_window(1000));
        let started = Instant::now();

        let err = RestartPolicy::default()
            .start_until(&mut storage, tokio::time::sleep(Duration::from_millis(1200)))
            .await
            .unwrap_err();

        assert!(matches!(err, ScenarioError::Interrupted));
        assert_eq!(started.elapsed(), Duration::from_millis(1200));
        assert!(!storage.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_ends_fixed_delay() {
        let mut storage = storage(builder());

        let err = RestartPolicy::FixedDelay(Duration::from_secs(20))
            .start_until(&mut storage, tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap_err();

        assert!(matches!(err, ScenarioError::Interrupted));
        assert!(!storage.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_does_not_cut_a_running_start() {
        let mut storage = SlowStart {
            inner: storage(builder()),
            delay: Duration::from_secs(5),
        };
        let started = Instant::now();

        let attempts = RestartPolicy::default()
            .start_until(&mut storage, tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();

        assert_eq!(attempts, 1);
        assert!(storage.is_started());
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }
}
