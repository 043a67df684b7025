//! Workload - Random large binary payloads
//!
//! TigerStyle: One seeded RNG drives both the size draws and the payload
//! bytes, so a seed replays the whole workload.

use bytes::Bytes;
use store_core::dst::DeterministicRng;

/// A generated payload and the unit count its length was drawn as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Size in units, in `0..units_max`
    pub units: u32,
    /// Random bytes, `units * unit_bytes` long
    pub data: Bytes,
}

/// Draws payload sizes uniformly and fills payloads from the same RNG.
#[derive(Debug)]
pub struct PayloadGenerator {
    rng: DeterministicRng,
    units_max: u32,
    unit_bytes: usize,
}

impl PayloadGenerator {
    /// Create a generator drawing sizes in `0..units_max` units of `unit_bytes`.
    ///
    /// # Panics
    /// Panics if `units_max` or `unit_bytes` is zero.
    #[must_use]
    pub fn new(rng: DeterministicRng, units_max: u32, unit_bytes: usize) -> Self {
        // Preconditions
        assert!(units_max > 0, "units_max must be positive");
        assert!(unit_bytes > 0, "unit_bytes must be positive");

        Self {
            rng,
            units_max,
            unit_bytes,
        }
    }

    /// Seed of the underlying RNG.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    /// Draw a size, then allocate and fill a payload of that size.
    pub fn next_payload(&mut self) -> Payload {
        let drawn = self.rng.next_int(0, i64::from(self.units_max) - 1);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let units = drawn as u32;
        let byte_count = units as usize * self.unit_bytes;

        let mut buffer = vec![0u8; byte_count];
        self.rng.fill_bytes(&mut buffer);

        // Postconditions
        assert!(units < self.units_max, "size must be below units_max");
        assert_eq!(buffer.len(), byte_count);

        Payload {
            units,
            data: Bytes::from(buffer),
        }
    }
}
