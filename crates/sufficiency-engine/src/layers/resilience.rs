//! Resilience math: baseline-versus-stress comparisons.
//!
//! Aligns the baseline and stress bucket sets (a mismatch is an ERROR) and
//! derives four deck-level metrics: removal continuity, wipe rebuild,
//! graveyard fragility, and commander fragility. Operator-specific metrics
//! read first-before / last-after values from the recorded impacts; when
//! an operator class never fired, each metric has a documented fallback.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fixed::Fixed6;
use crate::layers::probability_checkpoint::ProbabilityCheckpointPayload;
use crate::layers::requirement_detection::{CommanderDependence, RequirementDetectionPayload};
use crate::layers::stress_transform::StressTransformPayload;
use crate::norm::sorted_codes;
use crate::status::LayerStatus;
use crate::CHECKPOINTS;

pub const RESILIENCE_MATH_VERSION: &str = "resilience_math_engine_v1";

const ERROR_CODES: [&str; 6] = [
    "RESILIENCE_BASELINE_BUCKET_INVALID",
    "RESILIENCE_STRESS_BUCKET_INVALID",
    "RESILIENCE_BUCKET_ALIGNMENT_INVALID",
    "RESILIENCE_CHECKPOINT_INVALID",
    "RESILIENCE_PROBABILITY_INVALID",
    "RESILIENCE_OPERATOR_IMPACTS_INVALID",
];

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Deck-level metrics. `None` serializes as null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResilienceMetrics {
    pub engine_continuity_after_removal: Option<Fixed6>,
    pub rebuild_after_wipe: Option<Fixed6>,
    pub graveyard_fragility_delta: Option<Fixed6>,
    pub commander_fragility_delta: Option<Fixed6>,
}

impl ResilienceMetrics {
    fn unavailable() -> ResilienceMetrics {
        ResilienceMetrics {
            engine_continuity_after_removal: None,
            rebuild_after_wipe: None,
            graveyard_fragility_delta: None,
            commander_fragility_delta: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketResilienceRow {
    pub bucket: String,
    #[serde(rename = "baseline_effective_K")]
    pub baseline_effective_k: Fixed6,
    #[serde(rename = "stress_effective_K")]
    pub stress_effective_k: Fixed6,
    pub baseline_p_ge_1_mean: Fixed6,
    pub stress_p_ge_1_mean: Fixed6,
    pub stress_delta_p_ge_1_mean: Fixed6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResiliencePayload {
    pub version: String,
    pub status: LayerStatus,
    pub reason_code: Option<String>,
    pub codes: Vec<String>,
    pub format: String,
    pub checkpoints: Vec<u32>,
    pub commander_dependency: Option<String>,
    pub metrics: ResilienceMetrics,
    pub bucket_metrics: Vec<BucketResilienceRow>,
}

impl ResiliencePayload {
    fn skip(reason_code: &str, format: &str) -> ResiliencePayload {
        ResiliencePayload {
            version: RESILIENCE_MATH_VERSION.to_string(),
            status: LayerStatus::Skip,
            reason_code: Some(reason_code.to_string()),
            codes: Vec::new(),
            format: format.to_string(),
            checkpoints: CHECKPOINTS.to_vec(),
            commander_dependency: None,
            metrics: ResilienceMetrics::unavailable(),
            bucket_metrics: Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Parsing upstream rows
// ---------------------------------------------------------------------------

struct BucketSnapshot {
    effective_k: Fixed6,
    probabilities: BTreeMap<u32, Fixed6>,
}

fn checkpoint_map(
    rows: impl Iterator<Item = (u32, Fixed6)>,
    codes: &mut BTreeSet<String>,
) -> Option<BTreeMap<u32, Fixed6>> {
    let mut out: BTreeMap<u32, Fixed6> = BTreeMap::new();
    for (checkpoint, probability) in rows {
        if !CHECKPOINTS.contains(&checkpoint) {
            codes.insert("RESILIENCE_CHECKPOINT_INVALID".to_string());
            continue;
        }
        if out.contains_key(&checkpoint) {
            codes.insert("RESILIENCE_CHECKPOINT_INVALID".to_string());
            continue;
        }
        out.insert(checkpoint, probability.clamp_unit());
    }
    if CHECKPOINTS.iter().any(|checkpoint| !out.contains_key(checkpoint)) {
        codes.insert("RESILIENCE_CHECKPOINT_INVALID".to_string());
        return None;
    }
    Some(out)
}

fn normalized_effective_k(
    value: Fixed6,
    error_code: &str,
    codes: &mut BTreeSet<String>,
) -> Option<Fixed6> {
    if value < Fixed6::ZERO || value > Fixed6::DECK_SIZE {
        codes.insert(error_code.to_string());
        return None;
    }
    Some(value)
}

// ---------------------------------------------------------------------------
// Operator impact collection
// ---------------------------------------------------------------------------

/// First-before and last-after K per bucket for one operator class.
fn collect_operator_k_ratios(
    transform: &StressTransformPayload,
    operator_name: &str,
) -> Vec<Fixed6> {
    let mut first_before: BTreeMap<String, Fixed6> = BTreeMap::new();
    let mut last_after: BTreeMap<String, Fixed6> = BTreeMap::new();

    for impact in &transform.operator_impacts {
        if impact.operator.get("op").and_then(Value::as_str) != Some(operator_name) {
            continue;
        }
        for row in &impact.bucket_impacts {
            first_before
                .entry(row.bucket.clone())
                .or_insert(row.effective_k_before);
            last_after.insert(row.bucket.clone(), row.effective_k_after);
        }
    }

    first_before
        .iter()
        .filter_map(|(bucket, before)| {
            last_after
                .get(bucket)
                .map(|after| Fixed6::safe_ratio(*after, *before))
        })
        .collect()
}

/// Per bucket-and-checkpoint `max(0, first_before - last_after)` for one
/// operator class.
fn collect_operator_probability_deltas(
    transform: &StressTransformPayload,
    operator_name: &str,
) -> Vec<Fixed6> {
    let mut first_before: BTreeMap<(String, u32), Fixed6> = BTreeMap::new();
    let mut last_after: BTreeMap<(String, u32), Fixed6> = BTreeMap::new();

    for impact in &transform.operator_impacts {
        if impact.operator.get("op").and_then(Value::as_str) != Some(operator_name) {
            continue;
        }
        for row in &impact.bucket_impacts {
            for probability in &row.probabilities_before {
                first_before
                    .entry((row.bucket.clone(), probability.checkpoint))
                    .or_insert(probability.p_ge_1);
            }
            for probability in &row.probabilities_after {
                last_after.insert((row.bucket.clone(), probability.checkpoint), probability.p_ge_1);
            }
        }
    }

    first_before
        .iter()
        .filter_map(|(key, before)| {
            last_after
                .get(key)
                .map(|after| before.delta_nonnegative_unit(*after))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Compare baseline and stress-adjusted bucket states.
pub fn run_resilience(
    checkpoint: Option<&ProbabilityCheckpointPayload>,
    transform: Option<&StressTransformPayload>,
    requirements: Option<&RequirementDetectionPayload>,
) -> ResiliencePayload {
    let format_token = checkpoint
        .map(|payload| payload.format.as_str())
        .filter(|token| !token.is_empty())
        .or_else(|| transform.map(|payload| payload.format.as_str()))
        .unwrap_or("")
        .to_string();

    let Some(checkpoint) = checkpoint
        .filter(|payload| payload.status.is_ready() && !payload.probabilities_by_bucket.is_empty())
    else {
        return ResiliencePayload::skip("PROBABILITY_CHECKPOINT_UNAVAILABLE", &format_token);
    };

    let Some(transform) = transform.filter(|payload| {
        payload.status.is_ready() && !payload.stress_adjusted_probabilities_by_bucket.is_empty()
    }) else {
        return ResiliencePayload::skip("STRESS_TRANSFORM_UNAVAILABLE", &format_token);
    };

    let mut codes: BTreeSet<String> = BTreeSet::new();

    // Baseline snapshots.
    let mut baseline: BTreeMap<String, BucketSnapshot> = BTreeMap::new();
    for row in &checkpoint.probabilities_by_bucket {
        if baseline.contains_key(&row.bucket) {
            codes.insert("RESILIENCE_BASELINE_BUCKET_INVALID".to_string());
            continue;
        }
        let effective_k = normalized_effective_k(
            row.effective_k,
            "RESILIENCE_BASELINE_BUCKET_INVALID",
            &mut codes,
        );
        let probabilities = checkpoint_map(
            row.probabilities_by_checkpoint
                .iter()
                .map(|p| (p.checkpoint, p.p_ge_1)),
            &mut codes,
        );
        if let (Some(effective_k), Some(probabilities)) = (effective_k, probabilities) {
            baseline.insert(
                row.bucket.clone(),
                BucketSnapshot {
                    effective_k,
                    probabilities,
                },
            );
        }
    }

    // Stress snapshots.
    let mut stress: BTreeMap<String, BucketSnapshot> = BTreeMap::new();
    for row in &transform.stress_adjusted_probabilities_by_bucket {
        if stress.contains_key(&row.bucket) {
            codes.insert("RESILIENCE_STRESS_BUCKET_INVALID".to_string());
            continue;
        }
        let effective_k = normalized_effective_k(
            row.effective_k_after,
            "RESILIENCE_STRESS_BUCKET_INVALID",
            &mut codes,
        );
        let probabilities = checkpoint_map(
            row.probabilities_by_checkpoint
                .iter()
                .map(|p| (p.checkpoint, p.p_ge_1)),
            &mut codes,
        );
        if let (Some(effective_k), Some(probabilities)) = (effective_k, probabilities) {
            stress.insert(
                row.bucket.clone(),
                BucketSnapshot {
                    effective_k,
                    probabilities,
                },
            );
        }
    }

    if baseline.is_empty() {
        codes.insert("RESILIENCE_BASELINE_BUCKET_INVALID".to_string());
    }
    if stress.is_empty() {
        codes.insert("RESILIENCE_STRESS_BUCKET_INVALID".to_string());
    }
    let baseline_ids: BTreeSet<&String> = baseline.keys().collect();
    let stress_ids: BTreeSet<&String> = stress.keys().collect();
    if baseline_ids != stress_ids {
        codes.insert("RESILIENCE_BUCKET_ALIGNMENT_INVALID".to_string());
    }

    // Per-bucket metric rows over the aligned set.
    let mut bucket_metrics = Vec::new();
    let mut continuity_fallback_ratios = Vec::new();
    for (bucket, baseline_row) in &baseline {
        let Some(stress_row) = stress.get(bucket) else {
            continue;
        };

        let baseline_values: Vec<Fixed6> = CHECKPOINTS
            .iter()
            .map(|checkpoint| baseline_row.probabilities[checkpoint])
            .collect();
        let stress_values: Vec<Fixed6> = CHECKPOINTS
            .iter()
            .map(|checkpoint| stress_row.probabilities[checkpoint])
            .collect();
        let baseline_mean = Fixed6::mean(&baseline_values).unwrap_or(Fixed6::ZERO);
        let stress_mean = Fixed6::mean(&stress_values).unwrap_or(Fixed6::ZERO);

        continuity_fallback_ratios.push(Fixed6::safe_ratio(
            stress_row.effective_k,
            baseline_row.effective_k,
        ));

        bucket_metrics.push(BucketResilienceRow {
            bucket: bucket.clone(),
            baseline_effective_k: baseline_row.effective_k,
            stress_effective_k: stress_row.effective_k,
            baseline_p_ge_1_mean: baseline_mean.clamp_unit(),
            stress_p_ge_1_mean: stress_mean.clamp_unit(),
            stress_delta_p_ge_1_mean: baseline_mean.delta_nonnegative_unit(stress_mean),
        });
    }

    // Deck metrics from operator impacts, with fallbacks.
    let targeted_ratios = collect_operator_k_ratios(transform, "TARGETED_REMOVAL");
    let wipe_ratios = collect_operator_k_ratios(transform, "BOARD_WIPE");
    let graveyard_deltas = collect_operator_probability_deltas(transform, "GRAVEYARD_HATE_WINDOW");

    let mut metrics = ResilienceMetrics::unavailable();

    let continuity_source = if targeted_ratios.is_empty() {
        &continuity_fallback_ratios
    } else {
        &targeted_ratios
    };
    metrics.engine_continuity_after_removal =
        Fixed6::mean(continuity_source).map(Fixed6::clamp_unit);

    metrics.rebuild_after_wipe = if wipe_ratios.is_empty() {
        Some(Fixed6::ONE)
    } else {
        Fixed6::mean(&wipe_ratios).map(Fixed6::clamp_unit)
    };

    metrics.graveyard_fragility_delta = if graveyard_deltas.is_empty() {
        Some(Fixed6::ZERO)
    } else {
        Fixed6::mean(&graveyard_deltas).map(Fixed6::clamp_unit)
    };

    let commander_dependency = requirements
        .and_then(|payload| payload.engine_requirements_v1.as_ref())
        .map(|requirements| requirements.commander_dependent);
    if commander_dependency == Some(CommanderDependence::Low) {
        metrics.commander_fragility_delta = Some(Fixed6::ZERO);
    } else {
        metrics.commander_fragility_delta = None;
        codes.insert("RESILIENCE_COMMANDER_FRAGILITY_UNAVAILABLE".to_string());
    }

    let codes_sorted = sorted_codes(&codes);
    let status = if codes_sorted.iter().any(|c| ERROR_CODES.contains(&c.as_str())) {
        LayerStatus::Error
    } else if codes_sorted.is_empty() {
        LayerStatus::Ok
    } else {
        LayerStatus::Warn
    };

    ResiliencePayload {
        version: RESILIENCE_MATH_VERSION.to_string(),
        status,
        reason_code: None,
        codes: codes_sorted,
        format: format_token,
        checkpoints: CHECKPOINTS.to_vec(),
        commander_dependency: commander_dependency.map(|class| class.as_str().to_string()),
        metrics,
        bucket_metrics,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::mulligan_model::{CheckpointEffectiveN, MulliganModelPayload, PolicyEffectiveN};
    use crate::layers::probability_checkpoint::run_probability_checkpoint;
    use crate::layers::probability_core::run_probability_core;
    use crate::layers::requirement_detection::EngineRequirements;
    use crate::layers::stress_model_definition::run_stress_model_definition;
    use crate::layers::stress_transform::run_stress_transform;
    use crate::layers::substitution_engine::{BucketStateRow, SubstitutionEnginePayload};
    use crate::packs::mulligan_assumptions::MulliganPolicyId;
    use crate::packs::stress_models::StressModelsPack;
    use crate::packs::stress_operator_policy::StressOperatorPolicyPack;
    use serde_json::json;

    fn substitution_with(buckets: Vec<(&str, i64, i64)>) -> SubstitutionEnginePayload {
        SubstitutionEnginePayload {
            version: "substitution_engine_v1".to_string(),
            status: LayerStatus::Ok,
            reason_code: None,
            codes: Vec::new(),
            substitutions_version: Some("bucket_substitutions_v1".to_string()),
            format: "commander".to_string(),
            buckets: buckets
                .into_iter()
                .map(|(bucket, micros, k_int)| BucketStateRow {
                    bucket: bucket.to_string(),
                    k_primary: 0,
                    effective_k: Fixed6::from_micros(micros),
                    k_int,
                    active_requirement_flags: Vec::new(),
                    substitution_terms: Vec::new(),
                })
                .collect(),
        }
    }

    fn mulligan() -> MulliganModelPayload {
        let rows: Vec<CheckpointEffectiveN> = CHECKPOINTS
            .iter()
            .map(|checkpoint| CheckpointEffectiveN {
                checkpoint: *checkpoint,
                effective_n: Fixed6::from_int(i64::from(*checkpoint)),
            })
            .collect();
        MulliganModelPayload {
            version: "mulligan_model_v1".to_string(),
            status: LayerStatus::Ok,
            reason_code: None,
            codes: Vec::new(),
            assumptions_version: Some("mulligan_assumptions_v1".to_string()),
            format: "commander".to_string(),
            default_policy: Some(MulliganPolicyId::Normal),
            checkpoints: CHECKPOINTS.to_vec(),
            policy_effective_n: vec![PolicyEffectiveN {
                policy: MulliganPolicyId::Normal,
                effective_n_by_checkpoint: rows,
            }],
        }
    }

    fn policy() -> StressOperatorPolicyPack {
        StressOperatorPolicyPack::parse(&json!({
            "version": "stress_operator_policy_v1",
            "precedence": ["TARGETED_REMOVAL", "BOARD_WIPE", "GRAVEYARD_HATE_WINDOW", "STAX_TAX"],
            "tie_break": "op_name_then_json",
            "default_by_turn": {"TARGETED_REMOVAL": 4},
            "composition": {"mode": "sequential", "record_impacts": true}
        }))
        .unwrap()
    }

    fn requirements(dependence: CommanderDependence) -> RequirementDetectionPayload {
        RequirementDetectionPayload {
            version: "engine_requirement_detection_v1".to_string(),
            status: LayerStatus::Warn,
            reason_code: None,
            codes: Vec::new(),
            unknowns: Vec::new(),
            engine_requirements_v1: Some(EngineRequirements {
                flags: BTreeMap::new(),
                commander_dependent: dependence,
            }),
        }
    }

    fn pipeline_to_resilience(
        buckets: Vec<(&str, i64, i64)>,
        operators: serde_json::Value,
        dependence: CommanderDependence,
    ) -> ResiliencePayload {
        let substitution = substitution_with(buckets);
        let mulligan = mulligan();
        let checkpoint =
            run_probability_checkpoint("commander", Some(&substitution), Some(&mulligan));
        let pack = StressModelsPack::parse(&json!({
            "version": "stress_models_v1",
            "format_defaults": {
                "commander": {
                    "selection": {"default_model_id": "m"},
                    "models": {"m": {"operators": operators}}
                }
            }
        }))
        .unwrap();
        let definition =
            run_stress_model_definition("commander", "focused", "B2", None, Some(&pack));
        let math_core = run_probability_core(Some(&substitution));
        let policy = policy();
        let transform = run_stress_transform(
            Some(&substitution),
            Some(&checkpoint),
            Some(&definition),
            Some(&math_core),
            Some(&policy),
        );
        let requirements = requirements(dependence);
        run_resilience(Some(&checkpoint), Some(&transform), Some(&requirements))
    }

    #[test]
    fn missing_upstreams_skip() {
        let payload = run_resilience(None, None, None);
        assert_eq!(
            payload.reason_code.as_deref(),
            Some("PROBABILITY_CHECKPOINT_UNAVAILABLE")
        );
    }

    #[test]
    fn identity_removal_keeps_full_continuity() {
        let payload = pipeline_to_resilience(
            vec![("RAMP", 30_000_000, 30)],
            json!([{"op": "TARGETED_REMOVAL", "count": 0}]),
            CommanderDependence::Low,
        );
        assert_eq!(payload.status, LayerStatus::Ok);
        assert_eq!(
            payload.metrics.engine_continuity_after_removal,
            Some(Fixed6::ONE)
        );
        assert_eq!(payload.metrics.rebuild_after_wipe, Some(Fixed6::ONE));
        assert_eq!(payload.metrics.graveyard_fragility_delta, Some(Fixed6::ZERO));
        assert_eq!(payload.metrics.commander_fragility_delta, Some(Fixed6::ZERO));
    }

    #[test]
    fn removal_continuity_uses_first_before_last_after() {
        // Two removals of 5 from K=20: continuity = 10/20 = 0.5.
        let payload = pipeline_to_resilience(
            vec![("RAMP", 20_000_000, 20)],
            json!([
                {"op": "TARGETED_REMOVAL", "count": 5},
                {"op": "TARGETED_REMOVAL", "count": 5}
            ]),
            CommanderDependence::Low,
        );
        assert_eq!(
            payload.metrics.engine_continuity_after_removal.unwrap().to_string(),
            "0.500000"
        );
    }

    #[test]
    fn wipe_rebuild_defaults_to_one_without_wipes() {
        let payload = pipeline_to_resilience(
            vec![("RAMP", 20_000_000, 20)],
            json!([{"op": "TARGETED_REMOVAL", "count": 5}]),
            CommanderDependence::Low,
        );
        assert_eq!(payload.metrics.rebuild_after_wipe, Some(Fixed6::ONE));
    }

    #[test]
    fn wipe_rebuild_measures_k_ratio() {
        let payload = pipeline_to_resilience(
            vec![("RAMP", 20_000_000, 20)],
            json!([{"op": "BOARD_WIPE", "by_turn": 6, "surviving_engine_fraction": 0.5}]),
            CommanderDependence::Low,
        );
        assert_eq!(
            payload.metrics.rebuild_after_wipe.unwrap().to_string(),
            "0.500000"
        );
        // Continuity falls back to stress/baseline K: also 0.5.
        assert_eq!(
            payload.metrics.engine_continuity_after_removal.unwrap().to_string(),
            "0.500000"
        );
    }

    #[test]
    fn graveyard_fragility_from_probability_deltas() {
        let payload = pipeline_to_resilience(
            vec![("RAMP", 20_000_000, 20)],
            json!([{"op": "GRAVEYARD_HATE_WINDOW", "turns": [4, 5], "graveyard_penalty": 0.5}]),
            CommanderDependence::Low,
        );
        let delta = payload.metrics.graveyard_fragility_delta.unwrap();
        assert!(delta > Fixed6::ZERO);
    }

    #[test]
    fn non_low_commander_dependence_warns_with_null_metric() {
        let payload = pipeline_to_resilience(
            vec![("RAMP", 20_000_000, 20)],
            json!([]),
            CommanderDependence::High,
        );
        assert_eq!(payload.status, LayerStatus::Warn);
        assert_eq!(payload.metrics.commander_fragility_delta, None);
        assert_eq!(
            payload.codes,
            ["RESILIENCE_COMMANDER_FRAGILITY_UNAVAILABLE"]
        );
        assert_eq!(payload.commander_dependency.as_deref(), Some("HIGH"));
    }

    #[test]
    fn bucket_rows_carry_means_and_deltas() {
        let payload = pipeline_to_resilience(
            vec![("RAMP", 20_000_000, 20)],
            json!([{"op": "STAX_TAX", "by_turn": 3, "inflation_factor": 0.5}]),
            CommanderDependence::Low,
        );
        let row = &payload.bucket_metrics[0];
        assert_eq!(row.bucket, "RAMP");
        assert!(row.stress_p_ge_1_mean < row.baseline_p_ge_1_mean);
        assert_eq!(
            row.stress_delta_p_ge_1_mean,
            row.baseline_p_ge_1_mean
                .delta_nonnegative_unit(row.stress_p_ge_1_mean)
        );
    }
}
