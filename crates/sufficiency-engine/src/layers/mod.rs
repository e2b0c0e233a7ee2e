//! Pipeline layers.
//!
//! One module per stage, in dependency order. Every layer is a pure
//! function from frozen upstream payloads and immutable packs to exactly
//! one payload value; a layer that cannot run emits SKIP or ERROR and its
//! dependents cascade. No layer mutates shared state.

pub mod coherence;
pub mod commander_reliability;
pub mod mulligan_model;
pub mod probability_checkpoint;
pub mod probability_core;
pub mod required_effects_coverage;
pub mod requirement_detection;
pub mod resilience;
pub mod stress_model_definition;
pub mod stress_transform;
pub mod substitution_engine;
pub mod sufficiency_summary;
pub mod weight_multiplier;
