//! Document Scanner IT - Large binary storage restart scenario
//!
//! TigerStyle: Simulation-first integration scenario for the document
//! scanner's PostgreSQL-backed storage.
//!
//! # Scenario
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        LargeBinaryScenario                   │
//! ├─────────────────────────────────────────────┤
//! │  setup     │ locale, scratch paths, conf    │
//! │  workload  │ seeded 0..128 MiB payloads     │
//! │  restart   │ bounded `start` probe          │
//! ├─────────────────────────────────────────────┤
//! │  store-core Storage (Sim or PostgreSQL)     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Seeds are logged before any payload is drawn; set `LARGE_BINARY_IT_SEED`
//! to replay a run.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod constants;
pub mod error;
pub mod restart;
pub mod scenario;
pub mod setup;
pub mod workload;

pub use error::{ScenarioError, ScenarioResult};
pub use restart::RestartPolicy;
pub use scenario::{postgresql_storage_factory, LargeBinaryScenario, ScenarioConfig, ScenarioReport};
pub use workload::{Payload, PayloadGenerator};
