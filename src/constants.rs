//! TigerStyle Constants for the restart scenario
//!
//! Units are part of every name: _BYTES, _MS, _COUNT.

use store_core::constants::BYTES_PER_MIB;

// =============================================================================
// Workload
// =============================================================================

/// Entities stored before the restart
pub const SCENARIO_ENTITY_COUNT_DEFAULT: u32 = 20;

/// Upper bound on entities a configured scenario may store
pub const SCENARIO_ENTITY_COUNT_MAX: u32 = 1024;

/// Payload sizes are drawn from `0..SCENARIO_PAYLOAD_UNITS_MAX` units
pub const SCENARIO_PAYLOAD_UNITS_MAX: u32 = 128;

/// Bytes per payload unit
pub const SCENARIO_PAYLOAD_UNIT_BYTES_DEFAULT: usize = BYTES_PER_MIB;

// =============================================================================
// Restart
// =============================================================================

/// Deadline for the restarted storage to accept `start`
pub const RESTART_DEADLINE_MS_DEFAULT: u64 = 20_000;

/// Pause between `start` probes while the database is coming back
pub const RESTART_PROBE_INTERVAL_MS_DEFAULT: u64 = 500;

// =============================================================================
// Storage Setup
// =============================================================================

/// Persistence unit the storage is opened as
pub const PERSISTENCE_UNIT_NAME: &str = "document-scanner-it";

/// Username, password and database name of the managed database
pub const DATABASE_CREDENTIAL: &str = "document-scanner";

/// `createdb` is resolved by name
pub const CREATEDB_BINARY_NAME: &str = "createdb";

/// Pool size of the storage
pub const STORAGE_PARALLEL_QUERY_COUNT: u32 = 1;

/// Prefix of the scratch data directory and checksum file
pub const SCRATCH_PATH_PREFIX: &str = "document-scanner-large-binary-it";

/// Environment variable replaying a run with a fixed seed
pub const SEED_ENV: &str = "LARGE_BINARY_IT_SEED";

#[cfg(test)]
mod tests {
    use super::*;
    use store_core::constants::ENTITY_PAYLOAD_BYTES_MAX;

    #[test]
    fn test_largest_payload_fits_storage_limit() {
        let largest = (SCENARIO_PAYLOAD_UNITS_MAX as usize - 1) * SCENARIO_PAYLOAD_UNIT_BYTES_DEFAULT;
        assert!(largest <= ENTITY_PAYLOAD_BYTES_MAX);
    }

    #[test]
    fn test_probe_fits_deadline() {
        assert!(RESTART_PROBE_INTERVAL_MS_DEFAULT < RESTART_DEADLINE_MS_DEFAULT);
        assert!(SCENARIO_ENTITY_COUNT_DEFAULT <= SCENARIO_ENTITY_COUNT_MAX);
    }
}
