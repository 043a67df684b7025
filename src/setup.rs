//! Setup - Seed, scratch paths and storage configuration
//!
//! TigerStyle: Every path the storage receives is unique and absent.

use std::path::{Path, PathBuf};

use store_core::storage::{
    Entity, LargeBinaryEntity, PostgresqlAutoStorageConf, PostgresqlBasePath, StorageResult,
};

use crate::constants::{CREATEDB_BINARY_NAME, DATABASE_CREDENTIAL, SCRATCH_PATH_PREFIX, SEED_ENV};
use crate::error::{ScenarioError, ScenarioResult};

/// Seed override from the environment, if set.
///
/// # Errors
/// Returns `ScenarioError::Precondition` if the variable is not a `u64`.
pub fn seed_from_env() -> ScenarioResult<Option<u64>> {
    match std::env::var(SEED_ENV) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|e| {
            ScenarioError::precondition(format!("{SEED_ENV}={raw} is not a seed: {e}"))
        }),
        Err(_) => Ok(None),
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn wall_clock_seed() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

// =============================================================================
// Scratch Paths
// =============================================================================

/// A unique data directory and checksum file path, neither of which exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchPaths {
    /// Data directory the storage initializes
    pub database_dir: PathBuf,
    /// Scheme checksum file the storage writes
    pub scheme_checksum_file: PathBuf,
}

impl ScratchPaths {
    /// Reserve both names in the temp directory by creating, then removing them.
    ///
    /// # Errors
    /// Returns `ScenarioError::Io` if a path cannot be created or removed.
    pub fn reserve() -> ScenarioResult<Self> {
        Self::reserve_in(&std::env::temp_dir())
    }

    /// Reserve both names below `parent`.
    ///
    /// # Errors
    /// Returns `ScenarioError::Io` if a path cannot be created or removed.
    pub fn reserve_in(parent: &Path) -> ScenarioResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PATH_PREFIX)
            .tempdir_in(parent)
            .map_err(|e| ScenarioError::io("failed to create scratch data directory", e))?;
        let database_dir = dir.path().to_path_buf();
        dir.close()
            .map_err(|e| ScenarioError::io("failed to remove scratch data directory", e))?;

        let file = tempfile::Builder::new()
            .prefix(SCRATCH_PATH_PREFIX)
            .suffix("-scheme-checksum")
            .tempfile_in(parent)
            .map_err(|e| ScenarioError::io("failed to create scratch checksum file", e))?;
        let scheme_checksum_file = file.path().to_path_buf();
        file.close()
            .map_err(|e| ScenarioError::io("failed to remove scratch checksum file", e))?;

        // Postconditions
        assert!(!database_dir.exists(), "scratch data directory must be absent");
        assert!(!scheme_checksum_file.exists(), "scratch checksum file must be absent");

        tracing::debug!(
            database_dir = %database_dir.display(),
            scheme_checksum_file = %scheme_checksum_file.display(),
            "reserved scratch paths"
        );
        Ok(Self {
            database_dir,
            scheme_checksum_file,
        })
    }
}

/// Storage configuration managing [`LargeBinaryEntity`] in `scratch`.
///
/// # Errors
/// Returns the builder's validation error.
pub fn storage_conf(
    base_path: PostgresqlBasePath,
    scratch: &ScratchPaths,
) -> StorageResult<PostgresqlAutoStorageConf> {
    PostgresqlAutoStorageConf::builder(base_path)
        .managed_entity(LargeBinaryEntity::descriptor())
        .username(DATABASE_CREDENTIAL)
        .password(DATABASE_CREDENTIAL)
        .database_name(DATABASE_CREDENTIAL)
        .scheme_checksum_file(scratch.scheme_checksum_file.clone())
        .database_dir(scratch.database_dir.clone())
        .createdb_binary_path(CREATEDB_BINARY_NAME)
        .build()
}
