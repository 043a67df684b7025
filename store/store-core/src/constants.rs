//! TigerStyle Constants
//!
//! All limits use big-endian naming: CATEGORY_SPECIFICS_UNIT_LIMIT
//! Example: ENTITY_PAYLOAD_BYTES_MAX (not MAX_PAYLOAD_BYTES)
//!
//! Every constant includes units in the name:
//! - _BYTES_MAX/MIN for size limits
//! - _SECS_DEFAULT for time durations
//! - _COUNT_MAX for quantity limits
//! - _MS for milliseconds

// =============================================================================
// Entity Limits
// =============================================================================

/// Bytes in one mebibyte
pub const BYTES_PER_MIB: usize = 1024 * 1024;

/// Maximum size of a single binary payload accepted by `store`
pub const ENTITY_PAYLOAD_BYTES_MAX: usize = 256 * BYTES_PER_MIB; // 256MB

/// Maximum length of an entity or field name
pub const ENTITY_NAME_BYTES_MAX: usize = 63; // PostgreSQL NAMEDATALEN - 1

/// Maximum number of fields per entity
pub const ENTITY_FIELDS_COUNT_MAX: usize = 64;

// =============================================================================
// Storage Limits
// =============================================================================

/// Maximum parallel query count (pool size)
pub const STORAGE_PARALLEL_QUERY_COUNT_MAX: u32 = 64;

/// Maximum number of managed entity types
pub const STORAGE_MANAGED_ENTITIES_COUNT_MAX: usize = 256;

// =============================================================================
// PostgreSQL Server
// =============================================================================

/// Conventional root of versioned PostgreSQL installations (Debian layout)
pub const POSTGRESQL_BASE_ROOT_DEFAULT: &str = "/usr/lib/postgresql";

/// Environment variable overriding the discovered PostgreSQL base directory
pub const POSTGRESQL_BASE_DIR_ENV: &str = "DOCUMENT_SCANNER_POSTGRESQL_BASE_DIR";

/// Loopback address the managed server listens on
pub const POSTGRESQL_LISTEN_ADDRESS: &str = "127.0.0.1";

/// Seconds `pg_ctl` waits for the server to start or stop
pub const POSTGRESQL_PG_CTL_WAIT_SECS_DEFAULT: u64 = 60;

/// Seconds to wait for a pool connection
pub const POSTGRESQL_CONNECT_TIMEOUT_SECS_DEFAULT: u64 = 30;

/// Maintenance database used before the target database exists
pub const POSTGRESQL_MAINTENANCE_DATABASE: &str = "postgres";

/// Server log file name inside the data directory
pub const POSTGRESQL_SERVER_LOG_FILE_NAME: &str = "server.log";

/// Marker file that identifies an initialized data directory
pub const POSTGRESQL_VERSION_FILE_NAME: &str = "PG_VERSION";

/// Locale the cluster is initialized with (messages stay English)
pub const POSTGRESQL_LOCALE_DEFAULT: &str = "C";

/// Environment every PostgreSQL helper process runs with (English messages)
pub const POSTGRESQL_CHILD_LOCALE_ENV: [(&str, &str); 3] =
    [("LC_ALL", "C"), ("LC_MESSAGES", "C"), ("LANGUAGE", "en")];

// =============================================================================
// DST (Deterministic Simulation Testing)
// =============================================================================

/// Maximum fault injection probability
pub const DST_FAULT_PROBABILITY_MAX: f64 = 1.0;

// =============================================================================
// Time Constants
// =============================================================================

/// Milliseconds per second
pub const TIME_MS_PER_SEC: u64 = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_limits_are_sane() {
        assert_eq!(BYTES_PER_MIB, 1_048_576);
        assert!(ENTITY_PAYLOAD_BYTES_MAX >= 128 * BYTES_PER_MIB);
    }

    #[test]
    fn test_postgresql_constants() {
        assert!(POSTGRESQL_PG_CTL_WAIT_SECS_DEFAULT > 0);
        assert!(POSTGRESQL_BASE_ROOT_DEFAULT.starts_with('/'));
        assert!(STORAGE_PARALLEL_QUERY_COUNT_MAX >= 1);
    }
}
