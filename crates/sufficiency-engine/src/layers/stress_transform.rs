//! Stress transform: apply the selected operator sequence to the baseline
//! bucket states.
//!
//! Operators run in canonical order, never data-file order: `(by_turn,
//! policy precedence rank, op name, canonical JSON)` ascending. K-stage
//! operators mutate `effective_K` and recompute every checkpoint
//! probability; probability-stage operators scale the probabilities in
//! place. Turn metadata is carried through but does not gate checkpoint
//! application in v1: every operator applies to all four checkpoints.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fixed::Fixed6;
use crate::layers::probability_checkpoint::{CheckpointDraw, ProbabilityCheckpointPayload};
use crate::layers::probability_core::ProbabilityCorePayload;
use crate::layers::stress_model_definition::StressModelDefinitionPayload;
use crate::layers::substitution_engine::SubstitutionEnginePayload;
use crate::norm::sorted_codes;
use crate::packs::stress_models::Operator;
use crate::packs::stress_operator_policy::StressOperatorPolicyPack;
use crate::probability::hypergeom_p_ge_1;
use crate::status::LayerStatus;
use crate::{CHECKPOINTS, DECK_SIZE_N};

pub const STRESS_TRANSFORM_VERSION: &str = "stress_transform_engine_v2";

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointProbabilityRow {
    pub checkpoint: u32,
    pub p_ge_1: Fixed6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressBucketDelta {
    pub bucket: String,
    #[serde(rename = "effective_K_before")]
    pub effective_k_before: Fixed6,
    #[serde(rename = "K_int_before")]
    pub k_int_before: i64,
    #[serde(rename = "effective_K_after")]
    pub effective_k_after: Fixed6,
    #[serde(rename = "K_int_after")]
    pub k_int_after: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketImpact {
    pub bucket: String,
    #[serde(rename = "effective_K_before")]
    pub effective_k_before: Fixed6,
    #[serde(rename = "effective_K_after")]
    pub effective_k_after: Fixed6,
    #[serde(rename = "K_int_before")]
    pub k_int_before: i64,
    #[serde(rename = "K_int_after")]
    pub k_int_after: i64,
    pub probabilities_before: Vec<CheckpointProbabilityRow>,
    pub probabilities_after: Vec<CheckpointProbabilityRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorImpact {
    pub operator_index: u32,
    /// Scheduled operator with its resolved `by_turn`.
    pub operator: Value,
    pub bucket_impacts: Vec<BucketImpact>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressBucketProbabilities {
    pub bucket: String,
    #[serde(rename = "effective_K_after")]
    pub effective_k_after: Fixed6,
    #[serde(rename = "K_int_after")]
    pub k_int_after: i64,
    pub probabilities_by_checkpoint: Vec<StressCheckpointProbability>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressCheckpointProbability {
    pub checkpoint: u32,
    pub effective_n: Fixed6,
    pub n_int: i64,
    pub p_ge_1: Fixed6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressTransformPayload {
    pub version: String,
    pub status: LayerStatus,
    pub reason_code: Option<String>,
    pub codes: Vec<String>,
    pub format: String,
    #[serde(rename = "deck_size_N")]
    pub deck_size_n: u32,
    pub selected_model_id: Option<String>,
    pub policy_version: Option<String>,
    pub operators_applied: Vec<Value>,
    pub checkpoints: Vec<u32>,
    pub checkpoint_draws: Vec<CheckpointDraw>,
    #[serde(rename = "stress_adjusted_effective_K")]
    pub stress_adjusted_effective_k: Vec<StressBucketDelta>,
    pub stress_adjusted_probabilities_by_bucket: Vec<StressBucketProbabilities>,
    pub operator_impacts: Vec<OperatorImpact>,
}

impl StressTransformPayload {
    fn skip(
        reason_code: &str,
        format: &str,
        selected_model_id: Option<String>,
        policy_version: Option<String>,
    ) -> StressTransformPayload {
        StressTransformPayload {
            version: STRESS_TRANSFORM_VERSION.to_string(),
            status: LayerStatus::Skip,
            reason_code: Some(reason_code.to_string()),
            codes: Vec::new(),
            format: format.to_string(),
            deck_size_n: DECK_SIZE_N,
            selected_model_id,
            policy_version,
            operators_applied: Vec::new(),
            checkpoints: CHECKPOINTS.to_vec(),
            checkpoint_draws: Vec::new(),
            stress_adjusted_effective_k: Vec::new(),
            stress_adjusted_probabilities_by_bucket: Vec::new(),
            operator_impacts: Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

struct ScheduledOperator {
    by_turn: u32,
    precedence_rank: usize,
    operator: Operator,
    /// Flat serialized form with the resolved `by_turn`.
    wire: Value,
}

impl ScheduledOperator {
    fn sort_key(&self) -> (u32, usize, &'static str, String) {
        (
            self.by_turn,
            self.precedence_rank,
            self.operator.op_name(),
            crate::canonical::canonical_json(&self.wire),
        )
    }
}

fn schedule_operator(
    operator: &Operator,
    policy: Option<&StressOperatorPolicyPack>,
    codes: &mut BTreeSet<String>,
) -> Option<ScheduledOperator> {
    let default_turn = |op_name: &str| policy.and_then(|policy| policy.default_turn_for(op_name));

    let by_turn = match operator {
        Operator::TargetedRemoval { .. } => default_turn("TARGETED_REMOVAL"),
        Operator::BoardWipe { by_turn, .. } | Operator::StaxTax { by_turn, .. } => Some(*by_turn),
        Operator::GraveyardHateWindow { turns, .. } => turns.iter().min().copied(),
        Operator::Wheel { by_turn, .. } => by_turn.or_else(|| default_turn("WHEEL")),
        Operator::HandDisruption { by_turn, .. } => {
            by_turn.or_else(|| default_turn("HAND_DISRUPTION"))
        }
        Operator::CombatPressure { by_turn, .. } => {
            by_turn.or_else(|| default_turn("COMBAT_PRESSURE"))
        }
    };

    let Some(by_turn) = by_turn else {
        codes.insert("STRESS_TRANSFORM_OPERATOR_INVALID".to_string());
        return None;
    };

    let mut wire = operator.to_value();
    if let Some(object) = wire.as_object_mut() {
        object.insert("by_turn".to_string(), Value::from(by_turn));
    }

    Some(ScheduledOperator {
        by_turn,
        precedence_rank: policy
            .map(|policy| policy.precedence_rank(operator.op_name()))
            .unwrap_or(usize::MAX),
        operator: operator.clone(),
        wire,
    })
}

// ---------------------------------------------------------------------------
// Probability recomputation
// ---------------------------------------------------------------------------

fn recompute_probabilities(
    k_int: i64,
    draws: &BTreeMap<u32, CheckpointDraw>,
    codes: &mut BTreeSet<String>,
) -> Option<BTreeMap<u32, Fixed6>> {
    let mut out = BTreeMap::new();
    for checkpoint in CHECKPOINTS {
        let Some(draw) = draws.get(&checkpoint) else {
            codes.insert("STRESS_TRANSFORM_CHECKPOINT_DRAW_INVALID".to_string());
            return None;
        };
        let k = u32::try_from(k_int.clamp(0, i64::from(DECK_SIZE_N))).unwrap_or(0);
        let n = u32::try_from(draw.n_int.clamp(0, i64::from(DECK_SIZE_N))).unwrap_or(0);
        match hypergeom_p_ge_1(DECK_SIZE_N, k, n) {
            Ok(p) => {
                out.insert(checkpoint, p);
            }
            Err(_) => {
                codes.insert("STRESS_TRANSFORM_MATH_RUNTIME_ERROR".to_string());
                return None;
            }
        }
    }
    Some(out)
}

fn probability_rows(probabilities: &BTreeMap<u32, Fixed6>) -> Vec<CheckpointProbabilityRow> {
    CHECKPOINTS
        .iter()
        .map(|checkpoint| CheckpointProbabilityRow {
            checkpoint: *checkpoint,
            p_ge_1: probabilities.get(checkpoint).copied().unwrap_or(Fixed6::ZERO),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Bucket state
// ---------------------------------------------------------------------------

struct BucketState {
    effective_k: Fixed6,
    k_int: i64,
    probabilities: BTreeMap<u32, Fixed6>,
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Apply the selected stress model to the baseline bucket states.
pub fn run_stress_transform(
    substitution: Option<&SubstitutionEnginePayload>,
    checkpoint: Option<&ProbabilityCheckpointPayload>,
    definition: Option<&StressModelDefinitionPayload>,
    math_core: Option<&ProbabilityCorePayload>,
    policy: Option<&StressOperatorPolicyPack>,
) -> StressTransformPayload {
    let selected_model_id = definition.and_then(|payload| payload.selected_model_id.clone());
    let policy_version = policy.map(|pack| pack.version.clone());
    let format_token = definition
        .map(|payload| payload.format.as_str())
        .filter(|token| !token.is_empty())
        .or_else(|| checkpoint.map(|payload| payload.format.as_str()))
        .or_else(|| substitution.map(|payload| payload.format.as_str()))
        .unwrap_or("")
        .to_string();

    let skip = |reason: &str| {
        StressTransformPayload::skip(
            reason,
            &format_token,
            selected_model_id.clone(),
            policy_version.clone(),
        )
    };

    let Some(substitution) = substitution else {
        return skip("SUBSTITUTION_ENGINE_UNAVAILABLE");
    };
    let Some(checkpoint) = checkpoint else {
        return skip("PROBABILITY_CHECKPOINT_UNAVAILABLE");
    };
    let Some(definition) = definition else {
        return skip("STRESS_MODEL_DEFINITION_UNAVAILABLE");
    };
    if math_core.is_none() {
        return skip("PROBABILITY_MATH_CORE_UNAVAILABLE");
    }
    if checkpoint.checkpoint_draws.is_empty() {
        return skip("PROBABILITY_CHECKPOINT_UNAVAILABLE");
    }
    if substitution.buckets.is_empty() {
        return skip("SUBSTITUTION_ENGINE_UNAVAILABLE");
    }

    let mut codes: BTreeSet<String> = BTreeSet::new();
    if policy.is_none() {
        codes.insert("STRESS_TRANSFORM_OPERATOR_POLICY_INVALID".to_string());
    }

    // Checkpoint draws, validated against the floor policy.
    let mut draws: BTreeMap<u32, CheckpointDraw> = BTreeMap::new();
    for draw in &checkpoint.checkpoint_draws {
        if !CHECKPOINTS.contains(&draw.checkpoint) {
            continue;
        }
        let effective_n = draw.effective_n.clamp_deck_size();
        if draw.n_int != effective_n.floor_int() {
            codes.insert("STRESS_TRANSFORM_CHECKPOINT_DRAW_INVALID".to_string());
            continue;
        }
        draws.insert(
            draw.checkpoint,
            CheckpointDraw {
                checkpoint: draw.checkpoint,
                effective_n,
                n_int: draw.n_int,
            },
        );
    }
    if CHECKPOINTS.iter().any(|checkpoint| !draws.contains_key(checkpoint)) {
        codes.insert("STRESS_TRANSFORM_CHECKPOINT_DRAW_INVALID".to_string());
    }

    // Baseline bucket states, re-validated against the K-int policy.
    let mut baseline: BTreeMap<String, (Fixed6, i64)> = BTreeMap::new();
    for row in &substitution.buckets {
        let effective_k = row.effective_k.clamp_deck_size();
        if row.k_int != effective_k.floor_int() {
            codes.insert("STRESS_TRANSFORM_K_INT_POLICY_VIOLATION".to_string());
            continue;
        }
        baseline.insert(row.bucket.clone(), (effective_k, row.k_int));
    }

    let mut states: BTreeMap<String, BucketState> = BTreeMap::new();
    for (bucket, (effective_k, k_int)) in &baseline {
        let probabilities = recompute_probabilities(*k_int, &draws, &mut codes).unwrap_or_default();
        states.insert(
            bucket.clone(),
            BucketState {
                effective_k: *effective_k,
                k_int: *k_int,
                probabilities,
            },
        );
    }

    // Canonical operator schedule.
    let mut scheduled: Vec<ScheduledOperator> = definition
        .operators
        .iter()
        .filter_map(|operator| schedule_operator(operator, policy, &mut codes))
        .collect();
    scheduled.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    // Sequential application with per-operator impact records.
    let mut operator_impacts = Vec::with_capacity(scheduled.len());
    for (position, scheduled_op) in scheduled.iter().enumerate() {
        let mut bucket_impacts = Vec::with_capacity(states.len());
        let bucket_ids: Vec<String> = states.keys().cloned().collect();
        for bucket in &bucket_ids {
            let Some(state) = states.get_mut(bucket) else {
                continue;
            };
            let before_k = state.effective_k;
            let before_k_int = state.k_int;
            let before_rows = probability_rows(&state.probabilities);

            let mut after_k = before_k;
            let mut after_k_int = before_k_int;
            let mut after_probabilities = state.probabilities.clone();

            match &scheduled_op.operator {
                Operator::TargetedRemoval { count }
                | Operator::HandDisruption { count, .. } => {
                    after_k = before_k
                        .sub(Fixed6::from_int(i64::from(*count)))
                        .clamp_deck_size();
                    after_k_int = after_k.floor_int();
                    if let Some(recomputed) =
                        recompute_probabilities(after_k_int, &draws, &mut codes)
                    {
                        after_probabilities = recomputed;
                    }
                }
                Operator::BoardWipe {
                    surviving_engine_fraction,
                    ..
                } => {
                    after_k = before_k.mul(*surviving_engine_fraction).clamp_deck_size();
                    after_k_int = after_k.floor_int();
                    if let Some(recomputed) =
                        recompute_probabilities(after_k_int, &draws, &mut codes)
                    {
                        after_probabilities = recomputed;
                    }
                }
                Operator::GraveyardHateWindow {
                    graveyard_penalty, ..
                } => {
                    after_k = before_k.mul(*graveyard_penalty).clamp_deck_size();
                    after_k_int = after_k.floor_int();
                    if let Some(recomputed) =
                        recompute_probabilities(after_k_int, &draws, &mut codes)
                    {
                        after_probabilities = recomputed;
                    }
                }
                Operator::StaxTax {
                    inflation_factor, ..
                } => {
                    scale_probabilities(&mut after_probabilities, *inflation_factor);
                }
                Operator::Wheel { wheel_penalty, .. } => {
                    scale_probabilities(&mut after_probabilities, *wheel_penalty);
                }
                Operator::CombatPressure {
                    pressure_penalty, ..
                } => {
                    scale_probabilities(&mut after_probabilities, *pressure_penalty);
                }
            }

            let after_rows = probability_rows(&after_probabilities);
            state.effective_k = after_k;
            state.k_int = after_k_int;
            state.probabilities = after_probabilities;

            bucket_impacts.push(BucketImpact {
                bucket: bucket.clone(),
                effective_k_before: before_k,
                effective_k_after: after_k,
                k_int_before: before_k_int,
                k_int_after: after_k_int,
                probabilities_before: before_rows,
                probabilities_after: after_rows,
            });
        }

        operator_impacts.push(OperatorImpact {
            operator_index: position as u32 + 1,
            operator: scheduled_op.wire.clone(),
            bucket_impacts,
        });
    }

    // Final rollups.
    let stress_adjusted_effective_k: Vec<StressBucketDelta> = states
        .iter()
        .map(|(bucket, state)| {
            let (before_k, before_k_int) = baseline[bucket];
            StressBucketDelta {
                bucket: bucket.clone(),
                effective_k_before: before_k,
                k_int_before: before_k_int,
                effective_k_after: state.effective_k,
                k_int_after: state.k_int,
            }
        })
        .collect();

    let checkpoint_draw_rows: Vec<CheckpointDraw> = CHECKPOINTS
        .iter()
        .map(|checkpoint| {
            draws.get(checkpoint).cloned().unwrap_or(CheckpointDraw {
                checkpoint: *checkpoint,
                effective_n: Fixed6::ZERO,
                n_int: 0,
            })
        })
        .collect();

    let stress_adjusted_probabilities_by_bucket: Vec<StressBucketProbabilities> = states
        .iter()
        .map(|(bucket, state)| StressBucketProbabilities {
            bucket: bucket.clone(),
            effective_k_after: state.effective_k,
            k_int_after: state.k_int,
            probabilities_by_checkpoint: CHECKPOINTS
                .iter()
                .filter_map(|checkpoint| {
                    draws.get(checkpoint).map(|draw| StressCheckpointProbability {
                        checkpoint: *checkpoint,
                        effective_n: draw.effective_n,
                        n_int: draw.n_int,
                        p_ge_1: state
                            .probabilities
                            .get(checkpoint)
                            .copied()
                            .unwrap_or(Fixed6::ZERO),
                    })
                })
                .collect(),
        })
        .collect();

    let codes_sorted = sorted_codes(&codes);
    StressTransformPayload {
        version: STRESS_TRANSFORM_VERSION.to_string(),
        status: if codes_sorted.is_empty() {
            LayerStatus::Ok
        } else {
            LayerStatus::Error
        },
        reason_code: None,
        codes: codes_sorted,
        format: format_token,
        deck_size_n: DECK_SIZE_N,
        selected_model_id,
        policy_version,
        operators_applied: scheduled.iter().map(|op| op.wire.clone()).collect(),
        checkpoints: CHECKPOINTS.to_vec(),
        checkpoint_draws: checkpoint_draw_rows,
        stress_adjusted_effective_k,
        stress_adjusted_probabilities_by_bucket,
        operator_impacts,
    }
}

fn scale_probabilities(probabilities: &mut BTreeMap<u32, Fixed6>, factor: Fixed6) {
    for checkpoint in CHECKPOINTS {
        let current = probabilities.get(&checkpoint).copied().unwrap_or(Fixed6::ZERO);
        probabilities.insert(checkpoint, current.mul(factor).clamp_unit());
    }
}

// ===========================================================================
// Tests
// ===========================================================================
