//! Identifier generation for nodes and log entries

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_LENGTH: usize = 9;

/// Produces short base-36 identifiers
#[derive(Debug, Clone)]
pub struct IdGenerator {
    rng: StdRng,
}

impl IdGenerator {
    /// Creates a generator seeded from the operating system
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Creates a deterministic generator, mostly useful in tests
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Returns the next identifier
    pub fn next_id(&mut self) -> String {
        (0..ID_LENGTH)
            .map(|_| ID_ALPHABET[self.rng.gen_range(0..ID_ALPHABET.len())] as char)
            .collect()
    }

    /// Returns an identifier for which `taken` is false
    pub fn next_unique<F>(&mut self, taken: F) -> String
    where
        F: Fn(&str) -> bool,
    {
        loop {
            let id = self.next_id();
            if !taken(&id) {
                return id;
            }
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_base36_and_fixed_length() {
        let mut ids = IdGenerator::seeded(7);
        for _ in 0..100 {
            let id = ids.next_id();
            assert_eq!(id.len(), ID_LENGTH);
            assert!(id.bytes().all(|b| ID_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_seeded_generators_repeat() {
        let mut a = IdGenerator::seeded(42);
        let mut b = IdGenerator::seeded(42);
        assert_eq!(a.next_id(), b.next_id());
    }

    #[test]
    fn test_next_unique_skips_taken_ids() {
        let mut twin = IdGenerator::seeded(3);
        let first = twin.next_id();

        let mut ids = IdGenerator::seeded(3);
        let taken: HashSet<String> = [first.clone()].into_iter().collect();
        let id = ids.next_unique(|candidate| taken.contains(candidate));
        assert_ne!(id, first);
    }
}
