//! Probability checkpoints: baseline P(>=1) per bucket per checkpoint.
//!
//! Uses the default mulligan policy's effective draw counts. A fractional
//! `effective_n` floors to `n_int` with a WARN; every bucket is re-checked
//! against the K-int policy before its probabilities are computed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fixed::Fixed6;
use crate::layers::mulligan_model::MulliganModelPayload;
use crate::layers::substitution_engine::SubstitutionEnginePayload;
use crate::norm::sorted_codes;
use crate::probability::hypergeom_p_ge_1;
use crate::status::LayerStatus;
use crate::{CHECKPOINTS, DECK_SIZE_N};

pub const PROBABILITY_CHECKPOINT_VERSION: &str = "probability_checkpoint_layer_v1";

const ERROR_CODES: [&str; 3] = [
    "PROBABILITY_CHECKPOINT_DEFAULT_POLICY_UNAVAILABLE",
    "PROBABILITY_CHECKPOINT_K_INT_POLICY_VIOLATION",
    "PROBABILITY_CHECKPOINT_MATH_RUNTIME_ERROR",
];
const WARN_CODES: [&str; 1] = ["PROBABILITY_CHECKPOINT_EFFECTIVE_N_FLOORED"];

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Effective draw count at one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointDraw {
    pub checkpoint: u32,
    pub effective_n: Fixed6,
    pub n_int: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointProbability {
    pub checkpoint: u32,
    pub effective_n: Fixed6,
    pub n_int: i64,
    pub p_ge_1: Fixed6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketProbabilities {
    pub bucket: String,
    #[serde(rename = "effective_K")]
    pub effective_k: Fixed6,
    #[serde(rename = "K_int")]
    pub k_int: i64,
    pub probabilities_by_checkpoint: Vec<CheckpointProbability>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbabilityCheckpointPayload {
    pub version: String,
    pub status: LayerStatus,
    pub reason_code: Option<String>,
    pub codes: Vec<String>,
    pub format: String,
    #[serde(rename = "deck_size_N")]
    pub deck_size_n: u32,
    pub default_policy: Option<String>,
    pub checkpoints: Vec<u32>,
    pub checkpoint_draws: Vec<CheckpointDraw>,
    pub probabilities_by_bucket: Vec<BucketProbabilities>,
}

impl ProbabilityCheckpointPayload {
    fn base(
        status: LayerStatus,
        reason_code: Option<&str>,
        codes: Vec<String>,
        format: &str,
        default_policy: Option<String>,
        checkpoint_draws: Vec<CheckpointDraw>,
        probabilities_by_bucket: Vec<BucketProbabilities>,
    ) -> ProbabilityCheckpointPayload {
        ProbabilityCheckpointPayload {
            version: PROBABILITY_CHECKPOINT_VERSION.to_string(),
            status,
            reason_code: reason_code.map(str::to_string),
            codes,
            format: format.to_string(),
            deck_size_n: DECK_SIZE_N,
            default_policy,
            checkpoints: CHECKPOINTS.to_vec(),
            checkpoint_draws,
            probabilities_by_bucket,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Compute baseline bucket probabilities at the frozen checkpoints.
pub fn run_probability_checkpoint(
    format: &str,
    substitution: Option<&SubstitutionEnginePayload>,
    mulligan: Option<&MulliganModelPayload>,
) -> ProbabilityCheckpointPayload {
    let format_token = format.trim();

    let Some(substitution) = substitution.filter(|payload| !payload.buckets.is_empty()) else {
        return ProbabilityCheckpointPayload::base(
            LayerStatus::Skip,
            Some("SUBSTITUTION_ENGINE_UNAVAILABLE"),
            Vec::new(),
            format_token,
            None,
            Vec::new(),
            Vec::new(),
        );
    };

    let Some(mulligan) = mulligan else {
        return ProbabilityCheckpointPayload::base(
            LayerStatus::Skip,
            Some("MULLIGAN_MODEL_UNAVAILABLE"),
            Vec::new(),
            format_token,
            None,
            Vec::new(),
            Vec::new(),
        );
    };

    let mut codes: BTreeSet<String> = BTreeSet::new();
    let default_policy = mulligan.default_policy.map(|policy| policy.as_str().to_string());

    let checkpoint_draws: Vec<CheckpointDraw> = match mulligan.default_policy_row() {
        Some(policy_row) => policy_row
            .effective_n_by_checkpoint
            .iter()
            .map(|row| {
                let effective_n = row.effective_n.clamp_deck_size();
                let n_int = effective_n.floor_int();
                if !effective_n.is_integral() {
                    codes.insert("PROBABILITY_CHECKPOINT_EFFECTIVE_N_FLOORED".to_string());
                }
                CheckpointDraw {
                    checkpoint: row.checkpoint,
                    effective_n,
                    n_int,
                }
            })
            .collect(),
        None => {
            codes.insert("PROBABILITY_CHECKPOINT_DEFAULT_POLICY_UNAVAILABLE".to_string());
            Vec::new()
        }
    };

    let mut probabilities_by_bucket = Vec::with_capacity(substitution.buckets.len());
    for row in &substitution.buckets {
        let effective_k = row.effective_k.clamp_deck_size();
        let expected_k_int = effective_k.floor_int();
        if row.k_int != expected_k_int {
            codes.insert("PROBABILITY_CHECKPOINT_K_INT_POLICY_VIOLATION".to_string());
            continue;
        }

        let mut probabilities = Vec::with_capacity(checkpoint_draws.len());
        let mut math_failed = false;
        for draw in &checkpoint_draws {
            let k_int = u32::try_from(row.k_int.max(0)).unwrap_or(DECK_SIZE_N);
            let n_int = u32::try_from(draw.n_int.max(0)).unwrap_or(DECK_SIZE_N);
            match hypergeom_p_ge_1(DECK_SIZE_N, k_int, n_int) {
                Ok(p_ge_1) => probabilities.push(CheckpointProbability {
                    checkpoint: draw.checkpoint,
                    effective_n: draw.effective_n,
                    n_int: draw.n_int,
                    p_ge_1,
                }),
                Err(_) => {
                    codes.insert("PROBABILITY_CHECKPOINT_MATH_RUNTIME_ERROR".to_string());
                    math_failed = true;
                    break;
                }
            }
        }

        if !math_failed && probabilities.len() == checkpoint_draws.len() {
            probabilities_by_bucket.push(BucketProbabilities {
                bucket: row.bucket.clone(),
                effective_k,
                k_int: row.k_int,
                probabilities_by_checkpoint: probabilities,
            });
        }
    }

    let codes_sorted = sorted_codes(&codes);
    let status = if codes_sorted.iter().any(|c| ERROR_CODES.contains(&c.as_str())) {
        LayerStatus::Error
    } else if codes_sorted.iter().any(|c| WARN_CODES.contains(&c.as_str())) {
        LayerStatus::Warn
    } else {
        LayerStatus::Ok
    };

    ProbabilityCheckpointPayload::base(
        status,
        None,
        codes_sorted,
        format_token,
        default_policy,
        checkpoint_draws,
        probabilities_by_bucket,
    )
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::mulligan_model::{CheckpointEffectiveN, PolicyEffectiveN};
    use crate::layers::substitution_engine::BucketStateRow;
    use crate::packs::mulligan_assumptions::MulliganPolicyId;

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

    fn mulligan_with_n(values: [f64; 4]) -> MulliganModelPayload {
        let rows: Vec<CheckpointEffectiveN> = CHECKPOINTS
            .iter()
            .zip(values.iter())
            .map(|(checkpoint, value)| CheckpointEffectiveN {
                checkpoint: *checkpoint,
                effective_n: Fixed6::quantize_f64(*value).unwrap(),
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

    #[test]
    fn missing_substitution_skips() {
        let mulligan = mulligan_with_n([7.0, 9.0, 10.0, 12.0]);
        let payload = run_probability_checkpoint("commander", None, Some(&mulligan));
        assert_eq!(
            payload.reason_code.as_deref(),
            Some("SUBSTITUTION_ENGINE_UNAVAILABLE")
        );
    }

    #[test]
    fn missing_mulligan_skips() {
        let substitution = substitution_with(vec![("RAMP", 30_000_000, 30)]);
        let payload = run_probability_checkpoint("commander", Some(&substitution), None);
        assert_eq!(
            payload.reason_code.as_deref(),
            Some("MULLIGAN_MODEL_UNAVAILABLE")
        );
    }

    #[test]
    fn integral_draws_compute_reference_probability() {
        let substitution = substitution_with(vec![("RAMP", 30_000_000, 30)]);
        let mulligan = mulligan_with_n([7.0, 9.0, 10.0, 12.0]);
        let payload =
            run_probability_checkpoint("commander", Some(&substitution), Some(&mulligan));
        assert_eq!(payload.status, LayerStatus::Ok);
        assert_eq!(payload.deck_size_n, 99);
        assert_eq!(payload.default_policy.as_deref(), Some("NORMAL"));

        let ramp = &payload.probabilities_by_bucket[0];
        assert_eq!(ramp.bucket, "RAMP");
        // K=30, n=7: 1 - C(69,7)/C(99,7).
        assert_eq!(
            ramp.probabilities_by_checkpoint[0].p_ge_1.to_string(),
            "0.927528"
        );
    }

    #[test]
    fn fractional_effective_n_floors_with_warn() {
        let substitution = substitution_with(vec![("RAMP", 30_000_000, 30)]);
        let mulligan = mulligan_with_n([7.6, 9.0, 10.0, 12.0]);
        let payload =
            run_probability_checkpoint("commander", Some(&substitution), Some(&mulligan));
        assert_eq!(payload.status, LayerStatus::Warn);
        assert_eq!(payload.codes, ["PROBABILITY_CHECKPOINT_EFFECTIVE_N_FLOORED"]);
        assert_eq!(payload.checkpoint_draws[0].n_int, 7);
        assert_eq!(
            payload.probabilities_by_bucket[0].probabilities_by_checkpoint[0]
                .p_ge_1
                .to_string(),
            "0.927528"
        );
    }

    #[test]
    fn k_int_policy_violation_errors_and_drops_bucket() {
        let substitution = substitution_with(vec![
            ("RAMP", 30_000_000, 31),
            ("REMOVAL", 5_000_000, 5),
        ]);
        let mulligan = mulligan_with_n([7.0, 9.0, 10.0, 12.0]);
        let payload =
            run_probability_checkpoint("commander", Some(&substitution), Some(&mulligan));
        assert_eq!(payload.status, LayerStatus::Error);
        assert!(payload
            .codes
            .contains(&"PROBABILITY_CHECKPOINT_K_INT_POLICY_VIOLATION".to_string()));
        // Only the valid bucket survives.
        assert_eq!(payload.probabilities_by_bucket.len(), 1);
        assert_eq!(payload.probabilities_by_bucket[0].bucket, "REMOVAL");
    }

    #[test]
    fn missing_default_policy_row_errors() {
        let substitution = substitution_with(vec![("RAMP", 30_000_000, 30)]);
        let mut mulligan = mulligan_with_n([7.0, 9.0, 10.0, 12.0]);
        mulligan.policy_effective_n.clear();
        let payload =
            run_probability_checkpoint("commander", Some(&substitution), Some(&mulligan));
        assert_eq!(payload.status, LayerStatus::Error);
        assert_eq!(
            payload.codes,
            ["PROBABILITY_CHECKPOINT_DEFAULT_POLICY_UNAVAILABLE"]
        );
        assert!(payload.checkpoint_draws.is_empty());
    }

    #[test]
    fn zero_k_gives_zero_probability_and_full_k_gives_one() {
        let substitution = substitution_with(vec![
            ("EMPTY", 0, 0),
            ("FULL", 99_000_000, 99),
        ]);
        let mulligan = mulligan_with_n([7.0, 9.0, 10.0, 12.0]);
        let payload =
            run_probability_checkpoint("commander", Some(&substitution), Some(&mulligan));
        let empty = &payload.probabilities_by_bucket[0];
        let full = &payload.probabilities_by_bucket[1];
        for row in &empty.probabilities_by_checkpoint {
            assert_eq!(row.p_ge_1, Fixed6::ZERO);
        }
        for row in &full.probabilities_by_checkpoint {
            assert_eq!(row.p_ge_1, Fixed6::ONE);
        }
    }
}
