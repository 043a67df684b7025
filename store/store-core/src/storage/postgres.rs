//! PostgresqlAutoStorage - Production Storage
//!
//! TigerStyle: Real database storage on a PostgreSQL cluster the storage
//! provisions and owns.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   PostgresqlAutoStorage                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Cluster: initdb into the configured data directory          │
//! │  Server:  pg_ctl start/stop on a free loopback port          │
//! │  Database: createdb when pg_database lacks it                │
//! │  Pool: sqlx::PgPool sized by the parallel query count        │
//! │  Tables: one per managed entity, derived from its fields     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! `start` is idempotent and resumable: a failure after the server came up
//! leaves it running, and the next `start` continues from there. `shutdown`
//! closes the pool, then stops the server with a fast shutdown so the data
//! directory is immediately reusable by a new instance.

use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tokio::process::Command;

use crate::constants::{
    POSTGRESQL_CHILD_LOCALE_ENV, POSTGRESQL_CONNECT_TIMEOUT_SECS_DEFAULT, POSTGRESQL_LISTEN_ADDRESS,
    POSTGRESQL_MAINTENANCE_DATABASE, POSTGRESQL_PG_CTL_WAIT_SECS_DEFAULT,
    POSTGRESQL_SERVER_LOG_FILE_NAME, STORAGE_PARALLEL_QUERY_COUNT_MAX,
};

use super::backend::Storage;
use super::conf::PostgresqlAutoStorageConf;
use super::entity::{Entity, EntityDescriptor, FieldDescriptor, FieldKind, FieldValue, FieldValues};
use super::error::{StorageError, StorageResult};
use super::field::FieldRetriever;
use super::scheme::{create_table_sql, insert_sql, select_all_sql, SchemeChecksum, SchemeState};

// =============================================================================
// PostgresqlAutoStorage
// =============================================================================

/// Storage backed by a PostgreSQL cluster it provisions itself.
pub struct PostgresqlAutoStorage {
    conf: PostgresqlAutoStorageConf,
    persistence_unit_name: String,
    parallel_query_count: u32,
    field_retriever: Arc<dyn FieldRetriever>,
    /// Port of the running server, if this instance started one
    server_port: Option<u16>,
    pool: Option<PgPool>,
}

impl std::fmt::Debug for PostgresqlAutoStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresqlAutoStorage")
            .field("persistence_unit_name", &self.persistence_unit_name)
            .field("database_dir", &self.conf.database_dir())
            .field("server_port", &self.server_port)
            .field("started", &self.pool.is_some())
            .finish_non_exhaustive()
    }
}

impl PostgresqlAutoStorage {
    /// Create an unstarted storage.
    ///
    /// # Panics
    /// Panics if `persistence_unit_name` is empty or `parallel_query_count`
    /// is not in `1..=STORAGE_PARALLEL_QUERY_COUNT_MAX`.
    #[must_use]
    pub fn new(
        conf: PostgresqlAutoStorageConf,
        persistence_unit_name: impl Into<String>,
        parallel_query_count: u32,
        field_retriever: Arc<dyn FieldRetriever>,
    ) -> Self {
        let persistence_unit_name = persistence_unit_name.into();
        // Preconditions
        assert!(
            !persistence_unit_name.is_empty(),
            "persistence unit name cannot be empty"
        );
        assert!(
            (1..=STORAGE_PARALLEL_QUERY_COUNT_MAX).contains(&parallel_query_count),
            "parallel query count {parallel_query_count} not in 1..={STORAGE_PARALLEL_QUERY_COUNT_MAX}"
        );

        Self {
            conf,
            persistence_unit_name,
            parallel_query_count,
            field_retriever,
            server_port: None,
            pool: None,
        }
    }

    /// The configuration this storage was created with.
    #[must_use]
    pub fn conf(&self) -> &PostgresqlAutoStorageConf {
        &self.conf
    }

    /// Port of the managed server while it runs.
    #[must_use]
    pub fn server_port(&self) -> Option<u16> {
        self.server_port
    }

    fn pool(&self) -> StorageResult<&PgPool> {
        self.pool.as_ref().ok_or(StorageError::NotStarted)
    }

    fn check_managed(&self, descriptor: &EntityDescriptor) -> StorageResult<()> {
        if self.conf.is_managed(descriptor) {
            Ok(())
        } else {
            Err(StorageError::validation(format!(
                "entity {} is not managed by {}",
                descriptor.name, self.persistence_unit_name
            )))
        }
    }

    // =========================================================================
    // Cluster and Server
    // =========================================================================

    /// Run `initdb` into the (absent or empty) data directory.
    async fn init_cluster(&self) -> StorageResult<()> {
        let dir = self.conf.database_dir();
        tracing::info!(database_dir = %dir.display(), "initializing PostgreSQL cluster");

        let pwfile = tempfile::NamedTempFile::new()
            .map_err(|e| StorageError::io(std::env::temp_dir(), e))?;
        tokio::fs::write(pwfile.path(), self.conf.password())
            .await
            .map_err(|e| StorageError::io(pwfile.path(), e))?;

        let mut command = helper_command(self.conf.initdb_binary());
        command
            .arg("--pgdata")
            .arg(dir)
            .arg("--username")
            .arg(self.conf.username())
            .arg("--pwfile")
            .arg(pwfile.path())
            .arg("--auth=md5")
            .arg("--encoding=UTF8")
            .arg(format!("--locale={}", self.conf.locale()));
        run_binary(command, "initdb").await.map_err(|e| {
            StorageError::creation(format!("failed to initialize {}: {e}", dir.display()))
        })?;

        // Postcondition
        assert!(
            self.conf.is_cluster_initialized(),
            "initdb succeeded but {} holds no cluster",
            dir.display()
        );
        Ok(())
    }

    /// Start the server on a free loopback port and wait until it accepts connections.
    async fn start_server(&self) -> StorageResult<u16> {
        let dir = self.conf.database_dir();
        let port = free_port()?;
        let options = format!(
            "-p {port} -c listen_addresses={POSTGRESQL_LISTEN_ADDRESS} -k '{}'",
            dir.display()
        );

        let mut command = helper_command(self.conf.pg_ctl_binary());
        command
            .arg("--pgdata")
            .arg(dir)
            .arg("--log")
            .arg(dir.join(POSTGRESQL_SERVER_LOG_FILE_NAME))
            .arg("--wait")
            .arg(format!("--timeout={POSTGRESQL_PG_CTL_WAIT_SECS_DEFAULT}"))
            .arg("-o")
            .arg(options)
            .arg("start");
        run_binary(command, "pg_ctl start").await?;

        tracing::info!(port, database_dir = %dir.display(), "PostgreSQL server started");
        Ok(port)
    }

    /// Fast shutdown: active sessions are disconnected, no recovery needed afterwards.
    async fn stop_server(&self) -> StorageResult<()> {
        let dir = self.conf.database_dir();
        let mut command = helper_command(self.conf.pg_ctl_binary());
        command
            .arg("--pgdata")
            .arg(dir)
            .arg("--mode=fast")
            .arg("--wait")
            .arg(format!("--timeout={POSTGRESQL_PG_CTL_WAIT_SECS_DEFAULT}"))
            .arg("stop");
        run_binary(command, "pg_ctl stop").await?;

        tracing::info!(database_dir = %dir.display(), "PostgreSQL server stopped");
        Ok(())
    }

    /// Create the configured database unless it already exists.
    async fn ensure_database(&self, port: u16) -> StorageResult<()> {
        let name = self.conf.database_name();
        let maintenance = self.connect(port, POSTGRESQL_MAINTENANCE_DATABASE, 1).await?;
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(name)
                .fetch_one(&maintenance)
                .await
                .map_err(|e| StorageError::connection(format!("failed to look up {name}: {e}")))?;
        maintenance.close().await;

        if exists {
            return Ok(());
        }

        let mut command = helper_command(self.conf.createdb_binary());
        command
            .env("PGPASSWORD", self.conf.password())
            .arg("--host")
            .arg(POSTGRESQL_LISTEN_ADDRESS)
            .arg("--port")
            .arg(port.to_string())
            .arg("--username")
            .arg(self.conf.username())
            .arg("--owner")
            .arg(self.conf.username())
            .arg(name);
        run_binary(command, "createdb")
            .await
            .map_err(|e| StorageError::creation(format!("failed to create database {name}: {e}")))?;

        tracing::info!(database = name, "database created");
        Ok(())
    }

    async fn connect(&self, port: u16, database: &str, max_connections: u32) -> StorageResult<PgPool> {
        let options = PgConnectOptions::new()
            .host(POSTGRESQL_LISTEN_ADDRESS)
            .port(port)
            .username(self.conf.username())
            .password(self.conf.password())
            .database(database)
            .application_name(&self.persistence_unit_name);

        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(POSTGRESQL_CONNECT_TIMEOUT_SECS_DEFAULT))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::connection(format!("failed to connect to {database}: {e}")))
    }

    /// Verify the scheme checksum, then create missing tables.
    async fn init_schema(&self, pool: &PgPool) -> StorageResult<()> {
        let checksum = SchemeChecksum::compute(self.conf.entities(), self.field_retriever.as_ref());
        let state = checksum
            .verify_or_record(self.conf.scheme_checksum_file())
            .await?;

        for &descriptor in self.conf.entities() {
            let fields = self.field_retriever.relevant_fields(descriptor);
            sqlx::query(&create_table_sql(descriptor, &fields))
                .execute(pool)
                .await
                .map_err(|e| {
                    StorageError::creation(format!(
                        "failed to create table for {}: {e}",
                        descriptor.name
                    ))
                })?;
        }

        tracing::debug!(?state, tables = ?checksum.tables, "schema ready");
        if state == SchemeState::New {
            tracing::info!(tables = checksum.tables.len(), "created schema");
        }
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Command for a PostgreSQL helper binary with English messages.
fn helper_command(program: impl AsRef<std::ffi::OsStr>) -> Command {
    let mut command = Command::new(program);
    command.envs(POSTGRESQL_CHILD_LOCALE_ENV);
    command
}

/// Run a PostgreSQL helper binary to completion.
async fn run_binary(mut command: Command, binary: &str) -> StorageResult<Output> {
    command.stdin(Stdio::null()).kill_on_drop(true);
    tracing::debug!(binary, program = ?command.as_std().get_program(), "running");

    let output = command
        .output()
        .await
        .map_err(|e| StorageError::creation(format!("failed to run {binary}: {e}")))?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(StorageError::process(binary, output.status.to_string(), &output.stderr))
    }
}

/// Ask the OS for an unused loopback port.
fn free_port() -> StorageResult<u16> {
    let listener = std::net::TcpListener::bind((POSTGRESQL_LISTEN_ADDRESS, 0))
        .map_err(|e| StorageError::connection(format!("no free port: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| StorageError::connection(format!("no free port: {e}")))?
        .port();

    // Postcondition
    assert!(port > 0, "OS must assign a real port");
    Ok(port)
}

/// Decode a row into field values following the retrieved field order.
fn row_to_fields(row: &PgRow, fields: &[FieldDescriptor]) -> StorageResult<FieldValues> {
    let mut values = FieldValues::new();
    for (index, field) in fields.iter().enumerate() {
        let value = match field.kind {
            FieldKind::BigInt => row.try_get::<i64, _>(index).map(FieldValue::BigInt),
            FieldKind::Bytea => row
                .try_get::<Vec<u8>, _>(index)
                .map(|raw| FieldValue::Bytea(Bytes::from(raw))),
            FieldKind::Text => row.try_get::<String, _>(index).map(FieldValue::Text),
        }
        .map_err(|e| StorageError::read(format!("failed to decode {}: {e}", field.name)))?;
        values.push(field.name, value);
    }
    Ok(values)
}

fn warn_on_stale_pid_file(dir: &Path) {
    // A killed server leaves its pid file behind; pg_ctl refuses to start then.
    let pid_file = dir.join("postmaster.pid");
    if pid_file.is_file() {
        tracing::warn!(path = %pid_file.display(), "found postmaster.pid from a previous server");
    }
}

// =============================================================================
// Storage Implementation
// =============================================================================

#[async_trait]
impl Storage for PostgresqlAutoStorage {
    #[tracing::instrument(skip(self), fields(unit = %self.persistence_unit_name))]
    async fn start(&mut self) -> StorageResult<()> {
        if self.pool.is_some() {
            return Ok(());
        }
        self.conf.validate()?;

        if !self.conf.is_cluster_initialized() {
            self.init_cluster().await?;
        }

        let port = match self.server_port {
            Some(port) => port,
            None => {
                warn_on_stale_pid_file(self.conf.database_dir());
                let port = self.start_server().await?;
                self.server_port = Some(port);
                port
            }
        };

        self.ensure_database(port).await?;
        let pool = self
            .connect(port, self.conf.database_name(), self.parallel_query_count)
            .await?;
        if let Err(e) = self.init_schema(&pool).await {
            pool.close().await;
            return Err(e);
        }
        self.pool = Some(pool);

        tracing::info!(url = %self.conf.connection_url(port), "storage started");
        Ok(())
    }

    async fn store<E: Entity>(&self, entity: &E) -> StorageResult<()> {
        let pool = self.pool()?;
        let descriptor = E::descriptor();
        self.check_managed(descriptor)?;
        let id = entity
            .id()
            .ok_or_else(|| StorageError::validation("entity has no id assigned"))?;

        let fields = self.field_retriever.relevant_fields(descriptor);
        let mut values = Vec::with_capacity(fields.len());
        for field in fields.iter() {
            values.push(entity.field_value(field.name).ok_or_else(|| {
                StorageError::validation(format!("entity has no value for {}", field.name))
            })?);
        }

        let sql = insert_sql(descriptor, &fields);
        let mut query = sqlx::query(&sql);
        for value in &values {
            query = match value {
                FieldValue::BigInt(v) => query.bind(*v),
                FieldValue::Bytea(bytes) => query.bind(&bytes[..]),
                FieldValue::Text(text) => query.bind(text.as_str()),
            };
        }
        query.execute(pool).await.map_err(|e| {
            StorageError::write(format!("failed to store {} {id}: {e}", descriptor.name))
        })?;

        tracing::trace!(entity = descriptor.name, id, "stored");
        Ok(())
    }

    async fn run_query_all<E: Entity>(&self) -> StorageResult<Vec<E>> {
        let pool = self.pool()?;
        let descriptor = E::descriptor();
        self.check_managed(descriptor)?;

        let fields = self.field_retriever.relevant_fields(descriptor);
        let sql = select_all_sql(descriptor, &fields);
        let mut rows = sqlx::query(&sql).fetch(pool);

        let mut entities = Vec::new();
        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| StorageError::read(format!("failed to query {}: {e}", descriptor.name)))?
        {
            entities.push(E::from_fields(row_to_fields(&row, &fields)?)?);
        }
        Ok(entities)
    }

    #[tracing::instrument(skip(self), fields(unit = %self.persistence_unit_name))]
    async fn shutdown(&mut self) -> StorageResult<()> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        if self.server_port.is_some() {
            self.stop_server().await?;
            self.server_port = None;
        }
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.pool.is_some()
    }
}

impl Drop for PostgresqlAutoStorage {
    fn drop(&mut self) {
        if self.server_port.is_none() {
            return;
        }
        tracing::warn!(
            database_dir = %self.conf.database_dir().display(),
            "storage dropped while its server runs, stopping immediately"
        );
        let status = std::process::Command::new(self.conf.pg_ctl_binary())
            .arg("--pgdata")
            .arg(self.conf.database_dir())
            .arg("--mode=immediate")
            .arg("--wait")
            .arg("stop")
            .envs(POSTGRESQL_CHILD_LOCALE_ENV)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = status {
            tracing::error!("failed to stop PostgreSQL server: {e}");
        }
    }
}

// =============================================================================
// Tests (require PostgreSQL binaries)
// =============================================================================
