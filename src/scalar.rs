//! Scalar argument distributions
//!
//! Balance deltas, nonces, and code sizes are not classified; they are
//! scalar parameters. The recorder tracks each as a per-integer frequency
//! and exports `{max, ecdf}` with the x-axis normalised by the largest
//! observed value.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ecdf::{self, EcdfPoint};

/// Exported form of one scalar distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScalarStats {
    /// Largest observed value.
    pub max: u64,
    /// Value-based ECDF over `[0, 1]` (x = value / max).
    pub ecdf: Vec<EcdfPoint>,
}

/// Per-integer frequency counter for one scalar parameter.
#[derive(Debug, Clone, Default)]
pub struct ScalarDistribution {
    counts: BTreeMap<u64, u64>,
}

impl ScalarDistribution {
    /// Fresh, empty distribution.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence of `v`.
    #[inline]
    pub fn record(&mut self, v: u64) {
        *self.counts.entry(v).or_insert(0) += 1;
    }

    /// True when nothing has been recorded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Largest recorded value, zero when empty.
    pub fn max(&self) -> u64 {
        self.counts.keys().next_back().copied().unwrap_or(0)
    }

    /// Export as `{max, ecdf}` with at most `max_points` interior ECDF
    /// points. `None` when nothing was recorded.
    pub fn export(&self, max_points: usize) -> Option<ScalarStats> {
        if self.counts.is_empty() {
            return None;
        }
        let max = self.max();
        let pairs: Vec<(u64, u64)> = self.counts.iter().map(|(&v, &c)| (v, c)).collect();
        Some(ScalarStats {
            max,
            ecdf: ecdf::compressed_value_ecdf(&pairs, max, max_points),
        })
    }
}
