//! Synthetic record generation.
//!
//! Records are produced on demand in chunks so a multi-million row load never
//! materializes the whole dataset. A fixed seed keeps every run reproducible.

use bench_core::types::Record;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const DEFAULT_SEED: u64 = 0xDEAD_BEEF_CAFE_1337;

pub const CATEGORIES: [&str; 8] = [
    "electronics",
    "clothing",
    "food",
    "books",
    "toys",
    "tools",
    "sports",
    "music",
];

/// Base timestamp for generated rows (2023-11-14T22:13:20Z).
const TS_BASE: i64 = 1_700_000_000;
const TS_SPAN: i64 = 86_400 * 365;

/// Streams `total` records with ids `1..=total`.
pub struct RecordGenerator {
    rng: StdRng,
    next_id: u64,
    total: u64,
}

impl RecordGenerator {
    pub fn new(total: u64) -> Self {
        Self::with_seed(total, DEFAULT_SEED)
    }

    pub fn with_seed(total: u64, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            next_id: 1,
            total,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.total - (self.next_id - 1)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn record(&mut self, id: u64) -> Record {
        let category = CATEGORIES[self.rng.gen_range(0..CATEGORIES.len())];
        Record {
            id,
            timestamp: TS_BASE + self.rng.gen_range(0..TS_SPAN),
            category: category.to_string(),
            amount: self.rng.gen_range(1.0..10_000.0),
            quantity: self.rng.gen_range(1..100),
            description: format!("{category}-item-{id:08}"),
        }
    }

    /// Generate up to `max` records. Returns an empty vec once exhausted.
    pub fn next_chunk(&mut self, max: usize) -> Vec<Record> {
        let n = (max as u64).min(self.remaining()) as usize;
        let mut chunk = Vec::with_capacity(n);
        for _ in 0..n {
            let id = self.next_id;
            chunk.push(self.record(id));
            self.next_id += 1;
        }
        chunk
    }
}
