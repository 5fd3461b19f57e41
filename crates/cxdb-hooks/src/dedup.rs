//! Variant deduplication.
//!
//! Several events are emitted in up to three variants of increasing
//! richness (`x`, `x:debug`, `x:raw`), in that order. Only one per family
//! should be recorded.

use std::collections::HashMap;

use cxdb_settings::DedupMode;

use crate::catalog::{base_event, has_variants, variant_rank};

/// Decides which variant of an event family gets recorded.
#[derive(Clone, Debug)]
pub enum VariantDeduplicator {
    /// Best registered variant per family, computed once.
    Precomputed {
        /// Base name → accepted full name.
        best: HashMap<String, String>,
    },
    /// Highest rank seen so far per family in the current cycle.
    HighWaterMark {
        /// Base name → highest accepted rank.
        seen: HashMap<String, u8>,
    },
}

impl VariantDeduplicator {
    /// Build the precomputed map from the subscribed event list.
    #[must_use]
    pub fn precomputed<'a>(known_events: impl IntoIterator<Item = &'a str>) -> Self {
        let mut best: HashMap<String, String> = HashMap::new();
        let mut best_rank: HashMap<&str, u8> = HashMap::new();
        for event in known_events {
            if !has_variants(event) {
                continue;
            }
            let base = base_event(event);
            let rank = variant_rank(event);
            if best_rank.get(base).is_none_or(|&r| rank > r) {
                let _ = best_rank.insert(base, rank);
                let _ = best.insert(base.to_string(), event.to_string());
            }
        }
        Self::Precomputed { best }
    }

    /// Empty high-water-mark deduplicator.
    #[must_use]
    pub fn high_water_mark() -> Self {
        Self::HighWaterMark {
            seen: HashMap::new(),
        }
    }

    /// Deduplicator for `mode` over the subscribed `known_events`.
    #[must_use]
    pub fn for_mode(mode: DedupMode, known_events: &[String]) -> Self {
        match mode {
            DedupMode::Precomputed => Self::precomputed(known_events.iter().map(String::as_str)),
            DedupMode::HighWaterMark => Self::high_water_mark(),
        }
    }

    /// Whether `event` should be recorded.
    pub fn should_process(&mut self, event: &str) -> bool {
        if !has_variants(event) {
            return true;
        }
        let base = base_event(event);
        match self {
            Self::Precomputed { best } => best.get(base).is_none_or(|b| b == event),
            Self::HighWaterMark { seen } => {
                let rank = variant_rank(event);
                match seen.get(base) {
                    Some(&max) if rank <= max => false,
                    _ => {
                        let _ = seen.insert(base.to_string(), rank);
                        true
                    }
                }
            }
        }
    }

    /// Start a new cycle. Only the high-water-mark mode keeps per-cycle state.
    pub fn reset(&mut self) {
        if let Self::HighWaterMark { seen } = self {
            seen.clear();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
