//! Storage - Entity Persistence and Implementations
//!
//! TigerStyle: Abstract storage with simulation-first testing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Storage Trait                          │
//! │        start → store / run_query_all → shutdown              │
//! └─────────────────────────────────────────────────────────────┘
//!          ↑                              ↑
//!          │                              │
//! ┌────────┴────────┐        ┌────────────┴──────────┐
//! │   SimStorage    │        │ PostgresqlAutoStorage │
//! │   (testing)     │        │     (production)      │
//! └─────────────────┘        └───────────────────────┘
//!          │                              │
//!          └────── PostgresqlAutoStorageConf ──────┘
//!              FieldRetriever · IdGenerator · Scheme
//! ```
//!
//! # Simulation-First
//!
//! `SimStorage` honors the same lifecycle contract, including the
//! "starting up" window after a restart, driven by the DST fault injector.

mod backend;
mod conf;
mod entity;
mod error;
mod field;
mod id;
mod scheme;
mod sim;

#[cfg(feature = "postgres")]
mod postgres;

pub use backend::Storage;
pub use conf::{PostgresqlAutoStorageConf, PostgresqlAutoStorageConfBuilder, PostgresqlBasePath};
pub use entity::{
    Entity, EntityDescriptor, FieldDescriptor, FieldKind, FieldValue, FieldValues,
    LargeBinaryEntity,
};
pub use error::{StorageError, StorageResult};
pub use field::{CachedFieldRetriever, FieldRetriever};
pub use id::{IdGenerator, MemorySequentialIdGenerator};
pub use scheme::{create_table_sql, insert_sql, select_all_sql, SchemeChecksum, SchemeState};
pub use sim::{SimDatabase, SimDatabaseStats, SimStorage};

#[cfg(feature = "postgres")]
pub use postgres::PostgresqlAutoStorage;
