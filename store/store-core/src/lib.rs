//! Store Core - Entity Storage with DST
//!
//! TigerStyle simulation-first persistence for document scanner entities.
//!
//! # Philosophy
//!
//! 1. Every storage lifecycle is testable under simulation
//! 2. The production backend provisions its own PostgreSQL cluster
//! 3. Seeds are logged for reproducibility
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Store Core                     │
//! ├─────────────────────────────────────────────┤
//! │  Storage trait          │ start/store/query │
//! │  PostgresqlAutoStorage  │ initdb + pg_ctl   │
//! │  SimStorage             │ in-memory         │
//! ├─────────────────────────────────────────────┤
//! │  DST Framework          │ Fault injection   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use store_core::storage::{
//!     CachedFieldRetriever, Entity, LargeBinaryEntity, PostgresqlAutoStorageConf,
//!     PostgresqlBasePath, SimDatabase, SimStorage, Storage,
//! };
//!
//! # tokio_test::block_on(async {
//! let conf = PostgresqlAutoStorageConf::builder(PostgresqlBasePath::from_base("/usr/lib/postgresql/16"))
//!     .managed_entity(LargeBinaryEntity::descriptor())
//!     .username("scanner")
//!     .password("scanner")
//!     .database_name("scanner")
//!     .scheme_checksum_file("/tmp/scheme-checksum")
//!     .database_dir("/tmp/db")
//!     .build()
//!     .unwrap();
//!
//! let mut storage = SimStorage::new(&conf, SimDatabase::new(), Arc::new(CachedFieldRetriever::new()));
//! storage.start().await.unwrap();
//!
//! let mut entity = LargeBinaryEntity::new(vec![1u8, 2, 3]);
//! entity.set_id(1);
//! storage.store(&entity).await.unwrap();
//!
//! let all: Vec<LargeBinaryEntity> = storage.run_query_all().await.unwrap();
//! assert_eq!(all, vec![entity]);
//! storage.shutdown().await.unwrap();
//! # });
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod constants;
pub mod dst;
pub mod storage;

// Re-export common types
pub use constants::*;
pub use dst::{DeterministicRng, FaultConfig, FaultInjector, FaultInjectorBuilder, FaultType};
pub use storage::{
    Entity, LargeBinaryEntity, PostgresqlAutoStorageConf, PostgresqlBasePath, SimDatabase,
    SimStorage, Storage, StorageError, StorageResult,
};

#[cfg(feature = "postgres")]
pub use storage::PostgresqlAutoStorage;
