//! Identifier generation
//!
//! TigerStyle: One process-wide sequence; identifiers never repeat.

use std::any::Any;
use std::sync::atomic::{AtomicI64, Ordering};

use once_cell::sync::Lazy;

/// Produces identifiers for entities before they are stored.
pub trait IdGenerator: Send + Sync {
    /// Next identifier for `entity`. Distinct across calls within a process.
    fn next_id(&self, entity: &dyn Any) -> i64;
}

impl<T: IdGenerator + ?Sized> IdGenerator for &T {
    fn next_id(&self, entity: &dyn Any) -> i64 {
        (**self).next_id(entity)
    }
}

static GLOBAL: Lazy<MemorySequentialIdGenerator> = Lazy::new(MemorySequentialIdGenerator::new);

/// In-memory sequential identifier generator.
///
/// The sequence is not persisted; it restarts at 1 with each process.
#[derive(Debug)]
pub struct MemorySequentialIdGenerator {
    next: AtomicI64,
}

impl MemorySequentialIdGenerator {
    /// Create a generator starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create a generator starting at `first`.
    #[must_use]
    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }

    /// Process-wide shared instance.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }
}

impl Default for MemorySequentialIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for MemorySequentialIdGenerator {
    fn next_id(&self, _entity: &dyn Any) -> i64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);

        // Postcondition
        assert!(id < i64::MAX, "identifier sequence exhausted");
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_sequential() {
        let generator = MemorySequentialIdGenerator::new();
        assert_eq!(generator.next_id(&()), 1);
        assert_eq!(generator.next_id(&()), 2);
        assert_eq!(generator.next_id(&"other entity"), 3);
    }

    #[test]
    fn test_global_is_shared() {
        let a = MemorySequentialIdGenerator::global().next_id(&());
        let b = MemorySequentialIdGenerator::global().next_id(&());
        assert!(b > a);
    }

    #[test]
    fn test_distinct_across_threads() {
        let generator = Arc::new(MemorySequentialIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || (0..250).map(|_| generator.next_id(&())).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
