//! DST - Deterministic Simulation Testing
//!
//! TigerBeetle/FoundationDB-style deterministic simulation building blocks.
//!
//! # Philosophy
//!
//! > "If you're not testing with fault injection, you're not testing."
//!
//! # Usage
//!
//! ```rust
//! use store_core::dst::{DeterministicRng, FaultInjectorBuilder, FaultType};
//!
//! let injector = FaultInjectorBuilder::new(DeterministicRng::new(42))
//!     .with_startup_window(2)
//!     .build();
//!
//! assert_eq!(injector.should_inject("start"), Some(FaultType::DbStartingUp));
//! assert_eq!(injector.should_inject("start"), Some(FaultType::DbStartingUp));
//! assert_eq!(injector.should_inject("start"), None);
//! ```

mod fault;
mod rng;

pub use fault::{FaultConfig, FaultInjector, FaultInjectorBuilder, FaultType};
pub use rng::DeterministicRng;
