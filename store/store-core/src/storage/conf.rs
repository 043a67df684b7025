//! PostgresqlAutoStorageConf - Where and how the managed PostgreSQL lives
//!
//! TigerStyle: Immutable after build, validated before use.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use crate::constants::{
    ENTITY_NAME_BYTES_MAX, POSTGRESQL_BASE_DIR_ENV, POSTGRESQL_BASE_ROOT_DEFAULT,
    POSTGRESQL_LISTEN_ADDRESS, POSTGRESQL_LOCALE_DEFAULT, POSTGRESQL_VERSION_FILE_NAME, STORAGE_MANAGED_ENTITIES_COUNT_MAX,
};

use super::entity::EntityDescriptor;
use super::error::{StorageError, StorageResult};

// =============================================================================
// Base Path Discovery
// =============================================================================

/// A PostgreSQL installation: its base directory and the binaries below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresqlBasePath {
    /// Installation base, e.g. `/usr/lib/postgresql/16`
    pub base_dir: PathBuf,
    /// Binary directory, e.g. `/usr/lib/postgresql/16/bin`
    pub bin_dir: PathBuf,
}

impl PostgresqlBasePath {
    /// Base path with the conventional `bin` subdirectory.
    #[must_use]
    pub fn from_base(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let bin_dir = base_dir.join("bin");
        Self { base_dir, bin_dir }
    }

    fn has_initdb(&self) -> bool {
        self.bin_dir.join("initdb").is_file()
    }
}

/// Parse an installation directory name like `16` or `9.6`.
fn parse_version(name: &str) -> Option<Vec<u32>> {
    name.split('.').map(|part| part.parse::<u32>().ok()).collect()
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration of a storage backed by an auto-provisioned PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresqlAutoStorageConf {
    entities: Vec<&'static EntityDescriptor>,
    username: String,
    password: String,
    database_name: String,
    scheme_checksum_file: PathBuf,
    database_dir: PathBuf,
    base_path: PostgresqlBasePath,
    createdb_binary_path: PathBuf,
    locale: String,
}

impl PostgresqlAutoStorageConf {
    /// Start building a configuration for the given installation.
    #[must_use]
    pub fn builder(base_path: PostgresqlBasePath) -> PostgresqlAutoStorageConfBuilder {
        PostgresqlAutoStorageConfBuilder::new(base_path)
    }

    /// Find the newest PostgreSQL installation on this system.
    ///
    /// Honours `DOCUMENT_SCANNER_POSTGRESQL_BASE_DIR` (with `~` expansion);
    /// otherwise scans `/usr/lib/postgresql/<version>` (Debian layout).
    /// Returns `None` when no installation with an `initdb` binary exists.
    #[must_use]
    pub fn find_best_initial_postgresql_base_path() -> Option<PostgresqlBasePath> {
        if let Ok(base_dir) = std::env::var(POSTGRESQL_BASE_DIR_ENV) {
            let candidate = PostgresqlBasePath::from_base(shellexpand::tilde(&base_dir).into_owned());
            if candidate.has_initdb() {
                return Some(candidate);
            }
            tracing::warn!(
                base_dir = %candidate.base_dir.display(),
                "{POSTGRESQL_BASE_DIR_ENV} has no bin/initdb, falling back to discovery"
            );
        }
        Self::find_postgresql_base_path_in(Path::new(POSTGRESQL_BASE_ROOT_DEFAULT))
    }

    /// Find the newest versioned installation directly below `root`.
    #[must_use]
    pub fn find_postgresql_base_path_in(root: &Path) -> Option<PostgresqlBasePath> {
        let entries = std::fs::read_dir(root).ok()?;

        entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                let version = parse_version(name.to_str()?)?;
                let candidate = PostgresqlBasePath::from_base(entry.path());
                candidate.has_initdb().then_some((version, candidate))
            })
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(version, candidate)| {
                tracing::debug!(?version, base_dir = %candidate.base_dir.display(), "found PostgreSQL");
                candidate
            })
    }

    /// Managed entity types.
    #[must_use]
    pub fn entities(&self) -> &[&'static EntityDescriptor] {
        &self.entities
    }

    /// Whether `descriptor` is one of the managed entity types.
    #[must_use]
    pub fn is_managed(&self, descriptor: &EntityDescriptor) -> bool {
        self.entities.iter().any(|managed| managed.name == descriptor.name)
    }

    /// Database role name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Database role password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Database name.
    #[must_use]
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// File recording the checksum of the managed schema.
    #[must_use]
    pub fn scheme_checksum_file(&self) -> &Path {
        &self.scheme_checksum_file
    }

    /// Cluster data directory.
    #[must_use]
    pub fn database_dir(&self) -> &Path {
        &self.database_dir
    }

    /// PostgreSQL installation.
    #[must_use]
    pub fn base_path(&self) -> &PostgresqlBasePath {
        &self.base_path
    }

    /// Locale the cluster is initialized with.
    #[must_use]
    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Configured `createdb` path, as given.
    #[must_use]
    pub fn createdb_binary_path(&self) -> &Path {
        &self.createdb_binary_path
    }

    /// `initdb` in the installation's binary directory.
    #[must_use]
    pub fn initdb_binary(&self) -> PathBuf {
        self.base_path.bin_dir.join("initdb")
    }

    /// `pg_ctl` in the installation's binary directory.
    #[must_use]
    pub fn pg_ctl_binary(&self) -> PathBuf {
        self.base_path.bin_dir.join("pg_ctl")
    }

    /// Resolved `createdb` binary.
    ///
    /// A bare name is looked up in the binary directory first and otherwise
    /// left for `PATH` resolution.
    #[must_use]
    pub fn createdb_binary(&self) -> PathBuf {
        let mut components = self.createdb_binary_path.components();
        let bare = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if bare {
            let in_bin_dir = self.base_path.bin_dir.join(&self.createdb_binary_path);
            if in_bin_dir.is_file() {
                return in_bin_dir;
            }
        }
        self.createdb_binary_path.clone()
    }

    /// Whether the data directory holds an initialized cluster.
    #[must_use]
    pub fn is_cluster_initialized(&self) -> bool {
        self.database_dir.join(POSTGRESQL_VERSION_FILE_NAME).is_file()
    }

    /// Connection URL of the managed database on `port`, without the password.
    #[must_use]
    pub fn connection_url(&self, port: u16) -> String {
        format!(
            "postgres://{}@{POSTGRESQL_LISTEN_ADDRESS}:{port}/{}",
            self.username, self.database_name
        )
    }

    /// Check the configuration against the filesystem.
    ///
    /// # Errors
    /// Returns `StorageError::ConfValidation` describing the first problem.
    pub fn validate(&self) -> StorageResult<()> {
        if !self.base_path.base_dir.is_dir() {
            return Err(StorageError::conf_validation(format!(
                "PostgreSQL base directory {} does not exist",
                self.base_path.base_dir.display()
            )));
        }
        for binary in [self.initdb_binary(), self.pg_ctl_binary()] {
            if !binary.is_file() {
                return Err(StorageError::conf_validation(format!(
                    "PostgreSQL binary {} does not exist",
                    binary.display()
                )));
            }
        }

        if self.database_dir.exists() {
            if !self.database_dir.is_dir() {
                return Err(StorageError::conf_validation(format!(
                    "database directory {} is not a directory",
                    self.database_dir.display()
                )));
            }
            let empty = std::fs::read_dir(&self.database_dir)
                .map_err(|e| StorageError::io(&self.database_dir, e))?
                .next()
                .is_none();
            if !empty && !self.is_cluster_initialized() {
                return Err(StorageError::conf_validation(format!(
                    "database directory {} is neither empty nor a PostgreSQL cluster",
                    self.database_dir.display()
                )));
            }
        }

        if self.scheme_checksum_file.is_dir() {
            return Err(StorageError::conf_validation(format!(
                "scheme checksum file {} is a directory",
                self.scheme_checksum_file.display()
            )));
        }
        match self.scheme_checksum_file.parent() {
            Some(parent) if parent.as_os_str().is_empty() || parent.is_dir() => Ok(()),
            _ => Err(StorageError::conf_validation(format!(
                "parent directory of scheme checksum file {} does not exist",
                self.scheme_checksum_file.display()
            ))),
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`PostgresqlAutoStorageConf`].
#[derive(Debug)]
pub struct PostgresqlAutoStorageConfBuilder {
    base_path: PostgresqlBasePath,
    entities: Vec<&'static EntityDescriptor>,
    username: String,
    password: String,
    database_name: String,
    scheme_checksum_file: Option<PathBuf>,
    database_dir: Option<PathBuf>,
    createdb_binary_path: PathBuf,
    locale: String,
}

impl PostgresqlAutoStorageConfBuilder {
    fn new(base_path: PostgresqlBasePath) -> Self {
        Self {
            base_path,
            entities: Vec::new(),
            username: String::new(),
            password: String::new(),
            database_name: String::new(),
            scheme_checksum_file: None,
            database_dir: None,
            createdb_binary_path: PathBuf::from("createdb"),
            locale: POSTGRESQL_LOCALE_DEFAULT.to_string(),
        }
    }

    /// Add a managed entity type.
    #[must_use]
    pub fn managed_entity(mut self, descriptor: &'static EntityDescriptor) -> Self {
        self.entities.push(descriptor);
        self
    }

    /// Set the database role name.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Set the database role password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database_name(mut self, database_name: impl Into<String>) -> Self {
        self.database_name = database_name.into();
        self
    }

    /// Set the scheme checksum file.
    #[must_use]
    pub fn scheme_checksum_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.scheme_checksum_file = Some(path.into());
        self
    }

    /// Set the cluster data directory.
    #[must_use]
    pub fn database_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_dir = Some(path.into());
        self
    }

    /// Set the `createdb` binary (bare name or path).
    #[must_use]
    pub fn createdb_binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.createdb_binary_path = path.into();
        self
    }

    /// Set the cluster locale.
    #[must_use]
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    /// Returns `StorageError::ConfValidation` if a required value is missing
    /// or malformed. Filesystem checks happen in
    /// [`PostgresqlAutoStorageConf::validate`].
    pub fn build(self) -> StorageResult<PostgresqlAutoStorageConf> {
        if self.entities.is_empty() {
            return Err(StorageError::conf_validation("no managed entity types"));
        }
        if self.entities.len() > STORAGE_MANAGED_ENTITIES_COUNT_MAX {
            return Err(StorageError::conf_validation(format!(
                "{} managed entity types exceed max {STORAGE_MANAGED_ENTITIES_COUNT_MAX}",
                self.entities.len()
            )));
        }
        let mut names = HashSet::new();
        for descriptor in &self.entities {
            descriptor
                .validate()
                .map_err(|e| StorageError::conf_validation(e.to_string()))?;
            if !names.insert(descriptor.table_name()) {
                return Err(StorageError::conf_validation(format!(
                    "entity {} is managed twice",
                    descriptor.name
                )));
            }
        }

        for (what, value) in [
            ("username", &self.username),
            ("password", &self.password),
            ("database name", &self.database_name),
        ] {
            if value.is_empty() {
                return Err(StorageError::conf_validation(format!("{what} is empty")));
            }
            if value.len() > ENTITY_NAME_BYTES_MAX {
                return Err(StorageError::conf_validation(format!(
                    "{what} exceeds {ENTITY_NAME_BYTES_MAX} bytes"
                )));
            }
        }
        if self.createdb_binary_path.as_os_str().is_empty() {
            return Err(StorageError::conf_validation("createdb binary path is empty"));
        }

        let scheme_checksum_file = self
            .scheme_checksum_file
            .ok_or_else(|| StorageError::conf_validation("scheme checksum file not set"))?;
        let database_dir = self
            .database_dir
            .ok_or_else(|| StorageError::conf_validation("database directory not set"))?;

        Ok(PostgresqlAutoStorageConf {
            entities: self.entities,
            username: self.username,
            password: self.password,
            database_name: self.database_name,
            scheme_checksum_file,
            database_dir,
            base_path: self.base_path,
            createdb_binary_path: self.createdb_binary_path,
            locale: self.locale,
        })
    }
}
