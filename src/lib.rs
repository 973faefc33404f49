//! Crate root: public surface, core aliases, and model-wide invariants
//!
//! `statewalk` is a stochastic workload model for a blockchain
//! state-database. It records real operation streams into a Markovian event
//! model, fits the model's distribution parameters, and replays synthetic
//! workloads whose statistics match the recording.
//!
//! ## Invariants
//!
//! - **Alphabet.** Every observable event is an *extended operation*: a
//!   state-database operation paired with the kind labels of its three
//!   argument slots. The integer and mnemonic encodings in [`opcode`] are
//!   bijective on the legal subset.
//! - **Monotone recording.** The [`recorder::Recorder`] only ever increments;
//!   a model snapshot is immutable once exported.
//! - **Compensated summation.** Every probability accumulation that feeds an
//!   exported guarantee (ECDF endpoints, row sampling) runs through Kahan
//!   summation ([`ecdf::KahanSum`]); a naive sum breaks the guarantees on
//!   ill-conditioned inputs.
//! - **Snapshot deltas.** The depth of a revert target is measured from the
//!   top of the stack at the moment of the revert, identically during
//!   recording and replay.
//! - **Framing.** Sync-periods, blocks, and transactions nest strictly; the
//!   replayer never emits an unbalanced framing sequence.
//!
//! The model files flow `record → events → estimate → simulation → replay`;
//! see [`model`] for the on-disk formats.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Deterministic index → address/hash mapping used by the replayer.
pub mod address;
/// Synthetic argument generation from fitted classifier parameters.
pub mod arggen;
/// Online argument classification (kinds, recency, long-tail counting).
pub mod classifier;
/// Kahan summation, ECDF assembly, and polyline simplification.
pub mod ecdf;
/// Fitting of raw event frequencies into simulation parameters.
pub mod estimator;
/// Long-tail argument frequency counter.
pub mod frequency;
/// Canonical JSON model files (`stats` / `events` / `simulation`).
pub mod model;
/// Operation alphabet and extended-operation codec.
pub mod opcode;
/// Recording proxy decorating a state database.
pub mod proxy;
/// Bounded recency queue with positional hit statistics.
pub mod queue;
/// Markovian event recorder.
pub mod recorder;
/// Stochastic replayer driving a state database.
pub mod replayer;
/// Stochastic-matrix row sampling and truncated-exponential draws.
pub mod sampling;
/// Scalar (balance / nonce / code-size) distributions.
pub mod scalar;
/// State-database capability set and in-memory reference backend.
pub mod statedb;
/// Uniform synthetic model construction.
pub mod uniform;

/// A 20-byte account address.
pub type Address = [u8; 20];

/// A 32-byte storage key.
pub type Key = [u8; 32];

/// A 32-byte storage value.
pub type Value = [u8; 32];

/// A 32-byte digest (code hashes, key/value material).
pub type Hash32 = [u8; 32];

/// Capacity of every recency queue in the model, recording and replay side
/// alike. Changing this changes the meaning of exported queue distributions.
pub const QUEUE_LEN: usize = 32;

/// Default interior-point budget for exported ECDFs.
pub const NUM_ECDF_POINTS: usize = 300;

pub use classifier::{ArgKind, Classifier};
pub use opcode::{Op, XOp};
pub use recorder::Recorder;
pub use statedb::{InMemoryStateDb, StateDb};
