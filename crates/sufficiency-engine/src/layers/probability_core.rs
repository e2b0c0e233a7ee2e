//! Probability math core layer: validates the substitution buckets against
//! the K-int policy and self-checks the integer math backend.
//!
//! The arithmetic itself lives in `crate::probability`; this layer is the
//! contract surface that downstream probability layers rely on.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::layers::substitution_engine::SubstitutionEnginePayload;
use crate::norm::sorted_codes;
use crate::probability::{comb, hypergeom_p_ge_1, hypergeom_p_ge_x};
use crate::status::LayerStatus;

pub const PROBABILITY_MATH_CORE_VERSION: &str = "probability_math_core_v1";

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbabilityCorePayload {
    pub version: String,
    pub status: LayerStatus,
    pub reason_code: Option<String>,
    pub codes: Vec<String>,
    pub math_backend: String,
    pub available_functions: Vec<String>,
    pub validated_buckets: u64,
}

impl ProbabilityCorePayload {
    fn base(
        status: LayerStatus,
        reason_code: Option<&str>,
        codes: Vec<String>,
        validated_buckets: u64,
    ) -> ProbabilityCorePayload {
        ProbabilityCorePayload {
            version: PROBABILITY_MATH_CORE_VERSION.to_string(),
            status,
            reason_code: reason_code.map(str::to_string),
            codes,
            math_backend: "int_comb".to_string(),
            available_functions: vec![
                "comb".to_string(),
                "hypergeom_p_ge_1".to_string(),
                "hypergeom_p_ge_x".to_string(),
            ],
            validated_buckets,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Validate bucket K values and the math backend.
pub fn run_probability_core(
    substitution: Option<&SubstitutionEnginePayload>,
) -> ProbabilityCorePayload {
    let Some(substitution) = substitution.filter(|payload| !payload.buckets.is_empty()) else {
        return ProbabilityCorePayload::base(
            LayerStatus::Skip,
            Some("SUBSTITUTION_ENGINE_UNAVAILABLE"),
            Vec::new(),
            0,
        );
    };

    let mut codes: BTreeSet<String> = BTreeSet::new();
    let mut validated_buckets: u64 = 0;

    for row in &substitution.buckets {
        let expected_k_int = row.effective_k.clamp_deck_size().floor_int();
        if row.k_int != expected_k_int {
            codes.insert("PROBABILITY_MATH_K_INT_POLICY_VIOLATION".to_string());
            continue;
        }
        validated_buckets += 1;
    }

    // Backend self-check: known values must reproduce exactly.
    let comb_ok = comb(5, 2).map(|value| value == 10).unwrap_or(false);
    let p1_ok = hypergeom_p_ge_1(99, 0, 7)
        .map(|p| p == crate::fixed::Fixed6::ZERO)
        .unwrap_or(false);
    let px_ok = hypergeom_p_ge_x(99, 5, 7, 0)
        .map(|p| p == crate::fixed::Fixed6::ONE)
        .unwrap_or(false);
    if !(comb_ok && p1_ok && px_ok) {
        codes.insert("PROBABILITY_MATH_RUNTIME_ERROR".to_string());
    }

    let codes_sorted = sorted_codes(&codes);
    if codes_sorted.is_empty() {
        ProbabilityCorePayload::base(LayerStatus::Ok, None, codes_sorted, validated_buckets)
    } else {
        ProbabilityCorePayload::base(LayerStatus::Error, None, codes_sorted, validated_buckets)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::Fixed6;
    use crate::layers::substitution_engine::BucketStateRow;

    fn substitution_with(rows: Vec<BucketStateRow>) -> SubstitutionEnginePayload {
        SubstitutionEnginePayload {
            version: "substitution_engine_v1".to_string(),
            status: LayerStatus::Ok,
            reason_code: None,
            codes: Vec::new(),
            substitutions_version: Some("bucket_substitutions_v1".to_string()),
            format: "commander".to_string(),
            buckets: rows,
        }
    }

    fn bucket(name: &str, effective_k_micros: i64, k_int: i64) -> BucketStateRow {
        BucketStateRow {
            bucket: name.to_string(),
            k_primary: 0,
            effective_k: Fixed6::from_micros(effective_k_micros),
            k_int,
            active_requirement_flags: Vec::new(),
            substitution_terms: Vec::new(),
        }
    }

    #[test]
    fn missing_substitution_skips() {
        let payload = run_probability_core(None);
        assert_eq!(payload.status, LayerStatus::Skip);
        assert_eq!(
            payload.reason_code.as_deref(),
            Some("SUBSTITUTION_ENGINE_UNAVAILABLE")
        );
        assert_eq!(payload.validated_buckets, 0);
    }

    #[test]
    fn empty_buckets_skip() {
        let substitution = substitution_with(Vec::new());
        let payload = run_probability_core(Some(&substitution));
        assert_eq!(payload.status, LayerStatus::Skip);
    }

    #[test]
    fn valid_buckets_count_and_pass() {
        let substitution = substitution_with(vec![
            bucket("RAMP", 3_750_000, 3),
            bucket("REMOVAL", 1_000_000, 1),
        ]);
        let payload = run_probability_core(Some(&substitution));
        assert_eq!(payload.status, LayerStatus::Ok);
        assert_eq!(payload.validated_buckets, 2);
        assert_eq!(payload.math_backend, "int_comb");
        assert_eq!(
            payload.available_functions,
            ["comb", "hypergeom_p_ge_1", "hypergeom_p_ge_x"]
        );
    }

    #[test]
    fn k_int_policy_violation_errors() {
        let substitution = substitution_with(vec![bucket("RAMP", 3_750_000, 4)]);
        let payload = run_probability_core(Some(&substitution));
        assert_eq!(payload.status, LayerStatus::Error);
        assert_eq!(payload.codes, ["PROBABILITY_MATH_K_INT_POLICY_VIOLATION"]);
        assert_eq!(payload.validated_buckets, 0);
    }
}
