//! Online argument classification
//!
//! Every argument flowing through the recorder (addresses, storage keys,
//! stored values) is classified into one of six kinds relative to the stream
//! seen so far:
//!
//! - `ZeroArg`: the zero value of the argument type;
//! - `NewArg`: first sighting;
//! - `PrevArg`: equal to the most recent positive sighting (queue head);
//! - `RecentArg`: elsewhere in the recency queue;
//! - `RandArg`: seen before but already evicted from the queue;
//! - `NoArg`: the operation does not consume this argument slot (assigned
//!   by the codec, never produced by classification).
//!
//! Classification order matters: the zero check never touches the counters,
//! the queue lookup is what advances the positional histogram, and the
//! post-decision `place` promotes a value into the counter only when it was
//! absent from the queue. A value can therefore live in the counter without
//! being queued, but not the reverse in steady state.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::ecdf::EcdfPoint;
use crate::frequency::FrequencyCount;
use crate::queue::CountQueue;

/// Kind label assigned to a single argument slot.
///
/// Discriminants are stable; they participate in the extended-operation
/// integer encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ArgKind {
    /// Slot unused by the operation.
    NoArg = 0,
    /// The zero value of the argument type.
    ZeroArg = 1,
    /// Never seen before.
    NewArg = 2,
    /// Most recent positive sighting (queue position 0).
    PrevArg = 3,
    /// In the recency queue at a position > 0.
    RecentArg = 4,
    /// Previously seen, but evicted from the queue.
    RandArg = 5,
}

impl ArgKind {
    /// Number of kinds; radix of the extended-operation encoding.
    pub const COUNT: usize = 6;

    /// All kinds, in discriminant order.
    pub const ALL: [ArgKind; 6] = [
        ArgKind::NoArg,
        ArgKind::ZeroArg,
        ArgKind::NewArg,
        ArgKind::PrevArg,
        ArgKind::RecentArg,
        ArgKind::RandArg,
    ];

    /// Decode a discriminant.
    pub fn from_index(i: usize) -> Option<ArgKind> {
        Self::ALL.get(i).copied()
    }

    /// Single-letter mnemonic code; `NoArg` contributes nothing to a
    /// mnemonic and has no letter.
    pub fn code(self) -> Option<char> {
        match self {
            ArgKind::NoArg => None,
            ArgKind::ZeroArg => Some('z'),
            ArgKind::NewArg => Some('n'),
            ArgKind::PrevArg => Some('p'),
            ArgKind::RecentArg => Some('q'),
            ArgKind::RandArg => Some('r'),
        }
    }

    /// Inverse of [`ArgKind::code`].
    pub fn from_code(c: char) -> Option<ArgKind> {
        match c {
            'z' => Some(ArgKind::ZeroArg),
            'n' => Some(ArgKind::NewArg),
            'p' => Some(ArgKind::PrevArg),
            'q' => Some(ArgKind::RecentArg),
            'r' => Some(ArgKind::RandArg),
            _ => None,
        }
    }
}

/// Access statistics exported by one classifier: the distinct-argument count
/// with its compressed frequency ECDF, and the recency-queue distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClassifierStats {
    pub counting: CountingStats,
    pub queue: QueueStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CountingStats {
    /// Number of distinct non-zero arguments observed.
    pub n: u64,
    /// Compressed rank-based ECDF of argument frequencies.
    pub ecdf: Vec<EcdfPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueueStats {
    /// Probability of a queue hit per position `0..QUEUE_LEN`.
    pub distribution: Vec<f64>,
}

/// Classifier over one argument stream, combining the recency queue with the
/// long-tail frequency counter.
#[derive(Debug, Clone)]
pub struct Classifier<T> {
    queue: CountQueue<T>,
    freq: FrequencyCount<T>,
}

impl<T: Eq + Hash + Clone + Default> Classifier<T> {
    /// Fresh classifier with a recency queue of `queue_len` slots.
    pub fn new(queue_len: usize) -> Self {
        Self {
            queue: CountQueue::new(queue_len),
            freq: FrequencyCount::new(),
        }
    }

    /// Classify `x` against the stream seen so far, then record it.
    ///
    /// Not observationally pure: classifying the same value twice in a row
    /// yields `PrevArg` the second time.
    pub fn classify(&mut self, x: &T) -> ArgKind {
        if *x == T::default() {
            return ArgKind::ZeroArg;
        }
        let kind = match self.queue.find_position(x) {
            Some(0) => ArgKind::PrevArg,
            Some(_) => ArgKind::RecentArg,
            None => {
                if self.freq.exists(x) {
                    ArgKind::RandArg
                } else {
                    ArgKind::NewArg
                }
            }
        };
        self.place(x);
        kind
    }

    /// Record a positive sighting of `x` without classifying it: promote it
    /// through the counter when it is not queued, then push it at the head.
    pub fn place(&mut self, x: &T) {
        if !self.queue.contains(x) {
            self.freq.place(x.clone());
        }
        self.queue.place(x.clone());
    }

    /// Number of distinct non-zero arguments observed.
    #[inline]
    pub fn distinct(&self) -> u64 {
        self.freq.distinct() as u64
    }

    /// Export the access statistics with the given ECDF point budget.
    pub fn export_stats(&self, max_points: usize) -> ClassifierStats {
        ClassifierStats {
            counting: CountingStats {
                n: self.distinct(),
                ecdf: self.freq.export_ecdf(max_points),
            },
            queue: QueueStats {
                distribution: self.queue.export_distribution(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NUM_ECDF_POINTS, QUEUE_LEN};

    #[test]
    fn classify_basics() {
        // Stream [0, 1, 1, 2, 1] → [Zero, New, Prev, New, Recent].
        let mut c: Classifier<u64> = Classifier::new(QUEUE_LEN);
        let kinds: Vec<ArgKind> = [0u64, 1, 1, 2, 1].iter().map(|v| c.classify(v)).collect();
        assert_eq!(
            kinds,
            vec![
                ArgKind::ZeroArg,
                ArgKind::NewArg,
                ArgKind::PrevArg,
                ArgKind::NewArg,
                ArgKind::RecentArg,
            ]
        );
    }

    #[test]
    fn evicted_value_reclassifies_as_rand() {
        // Queue of 4: stream [1,2,3,4,5] evicts 1; 2 stays at the tail.
        let mut c: Classifier<u64> = Classifier::new(4);
        for v in 1u64..=5 {
            c.classify(&v);
        }
        let mut at_tail = c.clone();
        assert_eq!(c.classify(&1), ArgKind::RandArg);
        assert_eq!(at_tail.classify(&2), ArgKind::RecentArg);
        // Classifying 1 re-placed it at the head, which evicted 2.
        assert_eq!(c.classify(&2), ArgKind::RandArg);
    }

    #[test]
    fn zero_never_touches_counters() {
        let mut c: Classifier<u64> = Classifier::new(4);
        assert_eq!(c.classify(&0), ArgKind::ZeroArg);
        assert_eq!(c.classify(&0), ArgKind::ZeroArg);
        assert_eq!(c.distinct(), 0);
        let stats = c.export_stats(NUM_ECDF_POINTS);
        assert_eq!(stats.queue.distribution, vec![0.0; 4]);
    }

    #[test]
    fn queue_distribution_sums_to_one_after_hits() {
        let mut c: Classifier<u64> = Classifier::new(4);
        c.classify(&1);
        c.classify(&1);
        c.classify(&2);
        c.classify(&1);
        let dist = c.export_stats(NUM_ECDF_POINTS).queue.distribution;
        let sum: f64 = dist.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn counter_membership_survives_eviction() {
        let mut c: Classifier<u64> = Classifier::new(2);
        c.classify(&1);
        c.classify(&2);
        c.classify(&3); // 1 evicted
        assert_eq!(c.distinct(), 3);
        assert_eq!(c.classify(&1), ArgKind::RandArg);
    }

    #[test]
    fn works_with_byte_array_arguments() {
        let mut c: Classifier<[u8; 20]> = Classifier::new(4);
        let zero = [0u8; 20];
        let a = [1u8; 20];
        assert_eq!(c.classify(&zero), ArgKind::ZeroArg);
        assert_eq!(c.classify(&a), ArgKind::NewArg);
        assert_eq!(c.classify(&a), ArgKind::PrevArg);
    }
}
