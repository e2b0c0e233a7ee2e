//! Deterministic deck sufficiency pipeline for 99-card singleton decks.
//!
//! Takes a compiled per-slot primitive index, a profile/bracket selection,
//! and a set of versioned reference data packs, and produces a layered,
//! hash-stable sufficiency report: requirements, coherence, mulligan-aware
//! draw counts, substitution-weighted hypergeometric probabilities,
//! stress-adjusted probabilities, resilience and commander-reliability
//! metrics, and an aggregated PASS/WARN/FAIL verdict.
//!
//! Key behaviors:
//! - Byte-identical output across repeated runs: every mapping is iterated
//!   in sorted key order, every payload list has a declared sort order, and
//!   every six-decimal value is produced by exact integer arithmetic with
//!   half-away-from-zero quantization.
//! - Layers are pure functions over frozen upstream payloads and immutable
//!   data packs; a layer that cannot run emits SKIP/ERROR and dependents
//!   cascade. The pipeline always completes with a full `BuildResult`.
//! - The whole build is content-addressed by `build_hash_v1`, a SHA-256
//!   over the canonical JSON of the layer payloads and version pins.

#![forbid(unsafe_code)]

pub mod canonical;
pub mod combos;
pub mod fixed;
pub mod guard;
pub mod layers;
pub mod norm;
pub mod packs;
pub mod pipeline;
pub mod primitive_index;
pub mod probability;
pub mod request;
pub mod status;
pub mod trace;

pub use fixed::Fixed6;
pub use pipeline::{run_build, BuildResult};
pub use request::BuildRequest;
pub use status::{LayerStatus, SummaryStatus};

/// Singleton deck size: every pipeline draws from a 99-card population.
pub const DECK_SIZE_N: u32 = 99;

/// Frozen turn-index checkpoints at which `p_ge_1` is evaluated.
pub const CHECKPOINTS: [u32; 4] = [7, 9, 10, 12];
