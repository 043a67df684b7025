//! FaultInjector - Probabilistic Fault Injection
//!
//! TigerStyle: Explicit fault injection for chaos testing.

use std::collections::HashMap;
use std::sync::Mutex;

use super::rng::DeterministicRng;
use crate::constants::DST_FAULT_PROBABILITY_MAX;

/// Types of faults that can be injected.
///
/// TigerStyle: Every fault type is explicit and documented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultType {
    // =========================================================================
    // Storage Faults
    // =========================================================================
    /// Write operation fails
    StorageWriteFail,
    /// Read operation fails
    StorageReadFail,

    // =========================================================================
    // Database Lifecycle Faults
    // =========================================================================
    /// Server refuses connections while it is still starting up
    DbStartingUp,
    /// Connection fails outright
    DbConnectionFail,
    /// Server does not stop cleanly
    DbShutdownFail,
}

impl FaultType {
    /// Get the fault type name as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StorageWriteFail => "storage_write_fail",
            Self::StorageReadFail => "storage_read_fail",
            Self::DbStartingUp => "db_starting_up",
            Self::DbConnectionFail => "db_connection_fail",
            Self::DbShutdownFail => "db_shutdown_fail",
        }
    }
}

/// Configuration for a specific fault.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// The type of fault
    pub fault_type: FaultType,
    /// Probability of injection (0.0 to 1.0)
    pub probability: f64,
    /// Optional operation filter (substring match)
    pub operation_filter: Option<String>,
    /// Maximum number of injections (None = unlimited)
    pub max_injections: Option<u64>,
}

impl FaultConfig {
    /// Create a new fault configuration.
    ///
    /// # Panics
    /// Panics if probability is not in [0, 1].
    #[must_use]
    pub fn new(fault_type: FaultType, probability: f64) -> Self {
        // Precondition
        assert!(
            (0.0..=DST_FAULT_PROBABILITY_MAX).contains(&probability),
            "probability must be in [0, {DST_FAULT_PROBABILITY_MAX}], got {probability}"
        );

        Self {
            fault_type,
            probability,
            operation_filter: None,
            max_injections: None,
        }
    }

    /// Set operation filter (fault only applies to matching operations).
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.operation_filter = Some(filter.into());
        self
    }

    /// Set maximum number of injections.
    ///
    /// # Panics
    /// Panics if max is zero.
    #[must_use]
    pub fn with_max_injections(mut self, max: u64) -> Self {
        // Precondition
        assert!(max > 0, "max_injections must be positive");
        self.max_injections = Some(max);
        self
    }
}

/// Fault injector for simulation testing.
///
/// TigerStyle:
/// - Explicit fault registration
/// - Deterministic through RNG
/// - Interior mutability for sharing via Arc
#[derive(Debug)]
pub struct FaultInjector {
    rng: Mutex<DeterministicRng>,
    configs: Vec<FaultConfig>,
    injection_counts: Mutex<HashMap<FaultType, u64>>,
}

impl FaultInjector {
    /// Create a new fault injector with the given RNG.
    #[must_use]
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            configs: Vec::new(),
            injection_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Create an injector that never injects anything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(DeterministicRng::new(0))
    }

    /// Register a fault configuration.
    ///
    /// Registration must happen before sharing via Arc.
    pub fn register(&mut self, config: FaultConfig) {
        self.injection_counts
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(config.fault_type)
            .or_insert(0);
        self.configs.push(config);
    }

    /// Check if a fault should be injected for the given operation.
    ///
    /// Returns the fault type if one should be injected, None otherwise.
    pub fn should_inject(&self, operation: &str) -> Option<FaultType> {
        let mut counts = self
            .injection_counts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        for config in &self.configs {
            if let Some(ref filter) = config.operation_filter {
                if !operation.contains(filter.as_str()) {
                    continue;
                }
            }

            let count = counts.get(&config.fault_type).copied().unwrap_or(0);
            if config.max_injections.is_some_and(|max| count >= max) {
                continue;
            }

            let roll = {
                let mut rng = self
                    .rng
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                rng.next_bool(config.probability)
            };

            if roll {
                *counts.entry(config.fault_type).or_insert(0) += 1;
                return Some(config.fault_type);
            }
        }

        None
    }

    /// Get the number of injections of a given fault type.
    #[must_use]
    pub fn injection_count(&self, fault_type: FaultType) -> u64 {
        self.injection_counts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&fault_type)
            .copied()
            .unwrap_or(0)
    }

    /// Get total number of injections.
    #[must_use]
    pub fn total_injections(&self) -> u64 {
        self.injection_counts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .sum()
    }
}

/// Builder for FaultInjector.
///
/// TigerStyle: Builder pattern for clean configuration before sharing via Arc.
#[derive(Debug)]
pub struct FaultInjectorBuilder {
    rng: DeterministicRng,
    configs: Vec<FaultConfig>,
}

impl FaultInjectorBuilder {
    /// Create a new builder with the given RNG.
    #[must_use]
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            rng,
            configs: Vec::new(),
        }
    }

    /// Add a fault configuration.
    #[must_use]
    pub fn with_fault(mut self, config: FaultConfig) -> Self {
        self.configs.push(config);
        self
    }

    /// Make the first `count` starts fail as if the server were still starting up.
    #[must_use]
    pub fn with_startup_window(self, count: u64) -> Self {
        self.with_fault(
            FaultConfig::new(FaultType::DbStartingUp, 1.0)
                .with_filter("start")
                .with_max_injections(count),
        )
    }

    /// Build the FaultInjector.
    #[must_use]
    pub fn build(self) -> FaultInjector {
        let mut injector = FaultInjector::new(self.rng);
        for config in self.configs {
            injector.register(config);
        }
        injector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_faults_registered() {
        let injector = FaultInjector::disabled();

        for _ in 0..100 {
            assert!(injector.should_inject("any_operation").is_none());
        }
        assert_eq!(injector.total_injections(), 0);
    }

    #[test]
    fn test_always_inject() {
        let mut injector = FaultInjector::new(DeterministicRng::new(42));
        injector.register(FaultConfig::new(FaultType::StorageWriteFail, 1.0));

        for _ in 0..10 {
            assert_eq!(
                injector.should_inject("store"),
                Some(FaultType::StorageWriteFail)
            );
        }
        assert_eq!(injector.injection_count(FaultType::StorageWriteFail), 10);
    }

    #[test]
    fn test_operation_filter() {
        let mut injector = FaultInjector::new(DeterministicRng::new(42));
        injector.register(FaultConfig::new(FaultType::StorageReadFail, 1.0).with_filter("query"));

        assert!(injector.should_inject("store").is_none());
        assert_eq!(
            injector.should_inject("query_all"),
            Some(FaultType::StorageReadFail)
        );
    }

    #[test]
    fn test_max_injections() {
        let injector = FaultInjectorBuilder::new(DeterministicRng::new(42))
            .with_startup_window(3)
            .build();

        let injected = (0..10)
            .filter(|_| injector.should_inject("start").is_some())
            .count();

        assert_eq!(injected, 3);
        assert_eq!(injector.injection_count(FaultType::DbStartingUp), 3);
    }

    #[test]
    #[should_panic(expected = "probability must be in")]
    fn test_invalid_probability() {
        let _ = FaultConfig::new(FaultType::DbConnectionFail, 1.5);
    }
}
