//! Weighted-random scratch-card prize drawer.
//!
//! A prize table is compiled once from configuration into a cumulative
//! weight array; each draw is a single uniform sample over the total
//! weight plus a binary search. The randomness source is injected, so a
//! seeded RNG reproduces the exact draw sequence.

use crate::config::PrizeTableEntry;
use rand::Rng;

#[derive(Debug, Clone)]
struct PrizeOutcome {
    prize_cents: u64,
    /// Sum of this entry's weight and all weights before it.
    cumulative_weight: u64,
}

/// Compiled prize table ready for drawing.
#[derive(Debug, Clone)]
pub struct PrizeTable {
    outcomes: Vec<PrizeOutcome>,
}

impl PrizeTable {
    /// Compile a table from configured entries.
    ///
    /// Entries with a zero weight are skipped rather than rejected: a
    /// misconfigured table must never block a purchase. A table that ends
    /// up with no valid entries always draws a zero prize.
    pub fn from_entries(entries: &[PrizeTableEntry]) -> Self {
        let mut outcomes = Vec::with_capacity(entries.len());
        let mut cumulative = 0u64;

        for entry in entries {
            if entry.weight == 0 {
                continue;
            }
            cumulative += entry.weight as u64;
            outcomes.push(PrizeOutcome {
                prize_cents: entry.prize_cents,
                cumulative_weight: cumulative,
            });
        }

        Self { outcomes }
    }

    /// True when no valid entries survived compilation.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Draw one prize amount in cents.
    ///
    /// Probability of entry i = weight_i / total_weight. Empty tables
    /// deterministically draw 0.
    pub fn draw<R: Rng>(&self, rng: &mut R) -> u64 {
        let Some(last) = self.outcomes.last() else {
            return 0;
        };

        let roll = rng.gen_range(0..last.cumulative_weight);
        let index = self
            .outcomes
            .partition_point(|outcome| outcome.cumulative_weight <= roll);
        self.outcomes[index].prize_cents
    }
}
