//! Synthetic argument generation
//!
//! The replayer decodes each step into argument-kind labels; this module
//! turns a label back into a concrete argument index consistent with the
//! fitted classifier parameters. A local recency queue of the recording-time
//! capacity mirrors the classifier's queue, the live index pool stands in
//! for the universe of previously-seen values, and the long tail is drawn
//! from the fitted truncated exponential (rank 0 = oldest = hottest).
//!
//! The pool supports snapshot/revert emulation (the address universe is
//! saved on `snapshot`, restored on `revert`) and deferred deletion for
//! self-destructed accounts, applied at block boundaries.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::VecDeque;

use rand::Rng;

use crate::classifier::ArgKind;
use crate::model::ArgumentModel;
use crate::sampling::{self, truncated_exponential};
use crate::QUEUE_LEN;

/// Errors raised by argument synthesis.
#[derive(Debug, thiserror::Error)]
pub enum ArgGenError {
    #[error("cannot synthesise an argument for a NoArg slot")]
    NoArgRequested,
}

/// Synthesises argument indices for one argument class.
#[derive(Debug, Clone)]
pub struct ArgumentSynthesiser {
    /// Live indices, oldest (hottest) first.
    pool: Vec<u64>,
    /// Next fresh index for `NewArg` allocations.
    next_index: u64,
    /// Fitted exponential decay of the long tail.
    lambda: f64,
    /// Probability of each recency-queue position.
    queue_distribution: Vec<f64>,
    /// Local recency queue, newest at the front.
    queue: VecDeque<u64>,
    /// Pool snapshots, oldest first.
    saved: Vec<(Vec<u64>, u64)>,
    /// Indices awaiting deletion at the next block boundary.
    pending_destruction: Vec<u64>,
}

impl ArgumentSynthesiser {
    /// Build a synthesiser from fitted per-argument parameters.
    pub fn new(model: &ArgumentModel) -> Self {
        Self {
            pool: (1..=model.n).collect(),
            next_index: model.n + 1,
            lambda: model.lambda,
            queue_distribution: model.queue_distribution.clone(),
            queue: VecDeque::with_capacity(QUEUE_LEN),
            saved: Vec::new(),
            pending_destruction: Vec::new(),
        }
    }

    /// Number of live indices.
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Mirror of the classifier-side `place`: push at the head, bounded.
    fn enqueue(&mut self, index: u64) {
        if self.queue.len() == QUEUE_LEN {
            self.queue.pop_back();
        }
        self.queue.push_front(index);
    }

    /// Allocate a fresh index beyond everything seen so far.
    fn fresh(&mut self) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        self.pool.push(index);
        index
    }

    /// Sample an argument index for the requested kind.
    pub fn sample<R: Rng>(&mut self, rng: &mut R, kind: ArgKind) -> Result<u64, ArgGenError> {
        let index = match kind {
            ArgKind::NoArg => return Err(ArgGenError::NoArgRequested),
            ArgKind::ZeroArg => return Ok(0),
            ArgKind::NewArg => self.fresh(),
            ArgKind::PrevArg => match self.queue.front() {
                Some(&head) => head,
                // Nothing recent yet (replay warm-up): behave like a first
                // sighting so the walk can proceed.
                None => self.fresh(),
            },
            ArgKind::RecentArg => self.sample_recent(rng),
            ArgKind::RandArg => self.sample_random(rng),
        };
        if let Some(pos) = self.queue.iter().position(|&q| q == index) {
            self.queue.remove(pos);
        }
        self.enqueue(index);
        Ok(index)
    }

    /// Draw a queue position `> 0` from the fitted queue distribution and
    /// return the index held there.
    fn sample_recent<R: Rng>(&mut self, rng: &mut R) -> u64 {
        if self.queue.len() >= 2 {
            let upper = self.queue.len().min(self.queue_distribution.len());
            if upper >= 2 {
                let weights = &self.queue_distribution[1..upper];
                if let Ok(Some(i)) = sampling::sample_successor(rng, weights) {
                    return self.queue[i + 1];
                }
            }
            // The fitted distribution carries no mass on occupied positions;
            // fall back to a uniform recent position.
            let pos = rng.gen_range(1..self.queue.len());
            return self.queue[pos];
        }
        self.fresh()
    }

    /// Draw a pool rank from the truncated exponential and return that
    /// index. Low ranks are the oldest, most frequently reused values.
    fn sample_random<R: Rng>(&mut self, rng: &mut R) -> u64 {
        if self.pool.is_empty() {
            return self.fresh();
        }
        let x = truncated_exponential(rng, self.lambda);
        let rank = ((x * self.pool.len() as f64) as usize).min(self.pool.len() - 1);
        self.pool[rank]
    }

    // ------------------------------------------------------------------
    // Snapshot / revert emulation and deferred destruction
    // ------------------------------------------------------------------

    /// Save the live-pool metadata; paired with [`Self::revert_pool`].
    pub fn snapshot_pool(&mut self) {
        self.saved.push((self.pool.clone(), self.next_index));
    }

    /// Restore the pool saved `depth` snapshots below the top, pruning
    /// everything above it (the target snapshot stays).
    pub fn revert_pool(&mut self, depth: usize) {
        if self.saved.is_empty() {
            return;
        }
        let idx = self.saved.len().saturating_sub(1 + depth);
        let (pool, next_index) = self.saved[idx].clone();
        self.pool = pool;
        self.next_index = next_index;
        self.saved.truncate(idx + 1);
    }

    /// Forget all pool snapshots (transaction boundary).
    pub fn clear_snapshots(&mut self) {
        self.saved.clear();
    }

    /// Schedule `index` for deletion at the next block boundary.
    pub fn mark_destroyed(&mut self, index: u64) {
        self.pending_destruction.push(index);
    }

    /// Apply deferred deletions (block boundary).
    pub fn apply_destructions(&mut self) {
        if self.pending_destruction.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_destruction);
        self.pool.retain(|i| !pending.contains(i));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model(n: u64) -> ArgumentModel {
        ArgumentModel {
            n,
            lambda: 5.0,
            queue_distribution: vec![0.0; QUEUE_LEN],
        }
    }

    #[test]
    fn zero_kind_is_the_sentinel() {
        let mut s = ArgumentSynthesiser::new(&model(10));
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(s.sample(&mut rng, ArgKind::ZeroArg).unwrap(), 0);
    }

    #[test]
    fn new_allocates_beyond_the_universe() {
        let mut s = ArgumentSynthesiser::new(&model(10));
        let mut rng = StdRng::seed_from_u64(1);
        let a = s.sample(&mut rng, ArgKind::NewArg).unwrap();
        let b = s.sample(&mut rng, ArgKind::NewArg).unwrap();
        assert_eq!(a, 11);
        assert_eq!(b, 12);
        assert_eq!(s.pool_len(), 12);
    }

    #[test]
    fn prev_returns_the_most_recent_sample() {
        let mut s = ArgumentSynthesiser::new(&model(10));
        let mut rng = StdRng::seed_from_u64(1);
        let a = s.sample(&mut rng, ArgKind::NewArg).unwrap();
        assert_eq!(s.sample(&mut rng, ArgKind::PrevArg).unwrap(), a);
        assert_eq!(s.sample(&mut rng, ArgKind::PrevArg).unwrap(), a);
    }

    #[test]
    fn recent_draws_from_behind_the_head() {
        let mut s = ArgumentSynthesiser::new(&model(10));
        let mut rng = StdRng::seed_from_u64(1);
        let a = s.sample(&mut rng, ArgKind::NewArg).unwrap();
        let b = s.sample(&mut rng, ArgKind::NewArg).unwrap();
        let got = s.sample(&mut rng, ArgKind::RecentArg).unwrap();
        assert_eq!(got, a, "head is {b}, recent must reach behind it");
    }

    #[test]
    fn rand_stays_within_the_pool() {
        let mut s = ArgumentSynthesiser::new(&model(50));
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let idx = s.sample(&mut rng, ArgKind::RandArg).unwrap();
            assert!((1..=50).contains(&idx));
        }
    }

    #[test]
    fn no_arg_is_rejected() {
        let mut s = ArgumentSynthesiser::new(&model(10));
        let mut rng = StdRng::seed_from_u64(1);
        assert!(s.sample(&mut rng, ArgKind::NoArg).is_err());
    }

    #[test]
    fn snapshot_revert_restores_the_pool() {
        let mut s = ArgumentSynthesiser::new(&model(5));
        let mut rng = StdRng::seed_from_u64(1);
        s.snapshot_pool();
        s.sample(&mut rng, ArgKind::NewArg).unwrap();
        s.sample(&mut rng, ArgKind::NewArg).unwrap();
        assert_eq!(s.pool_len(), 7);
        s.revert_pool(0);
        assert_eq!(s.pool_len(), 5);
        // next_index was restored too, so the rolled-back indices are reused.
        assert_eq!(s.sample(&mut rng, ArgKind::NewArg).unwrap(), 6);
    }

    #[test]
    fn revert_depth_selects_older_snapshots() {
        let mut s = ArgumentSynthesiser::new(&model(2));
        let mut rng = StdRng::seed_from_u64(1);
        s.snapshot_pool(); // pool = 2
        s.sample(&mut rng, ArgKind::NewArg).unwrap();
        s.snapshot_pool(); // pool = 3
        s.sample(&mut rng, ArgKind::NewArg).unwrap();
        s.snapshot_pool(); // pool = 4
        s.sample(&mut rng, ArgKind::NewArg).unwrap();
        s.revert_pool(2);
        assert_eq!(s.pool_len(), 2);
    }

    #[test]
    fn destruction_is_deferred_to_the_block_boundary() {
        let mut s = ArgumentSynthesiser::new(&model(5));
        s.mark_destroyed(3);
        assert_eq!(s.pool_len(), 5);
        s.apply_destructions();
        assert_eq!(s.pool_len(), 4);
        s.apply_destructions();
        assert_eq!(s.pool_len(), 4);
    }
}
