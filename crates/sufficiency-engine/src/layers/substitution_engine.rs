//! Substitution engine: per-bucket effective success counts.
//!
//! `effective_K` for a bucket is the count of slots carrying a primary
//! primitive plus the weighted counts of active substitution primitives.
//! Base substitutions are always active; conditional substitutions
//! activate only when their requirement flag is exactly boolean true.
//! Conditional depth is bounded to that single level.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fixed::Fixed6;
use crate::layers::requirement_detection::RequirementDetectionPayload;
use crate::norm::sorted_codes;
use crate::packs::bucket_substitutions::BucketSubstitutionsPack;
use crate::primitive_index::PrimitiveIndex;
use crate::status::LayerStatus;

pub const SUBSTITUTION_ENGINE_VERSION: &str = "substitution_engine_v1";

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// One aggregated substitution primitive contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionTerm {
    pub primitive: String,
    pub weight: Fixed6,
    pub k_substitute: u32,
    pub contribution: Fixed6,
}

/// Per-bucket effective-K state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketStateRow {
    pub bucket: String,
    pub k_primary: u32,
    #[serde(rename = "effective_K")]
    pub effective_k: Fixed6,
    #[serde(rename = "K_int")]
    pub k_int: i64,
    pub active_requirement_flags: Vec<String>,
    pub substitution_terms: Vec<SubstitutionTerm>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionEnginePayload {
    pub version: String,
    pub status: LayerStatus,
    pub reason_code: Option<String>,
    pub codes: Vec<String>,
    pub substitutions_version: Option<String>,
    pub format: String,
    pub buckets: Vec<BucketStateRow>,
}

impl SubstitutionEnginePayload {
    fn skip(
        reason_code: &str,
        substitutions_version: Option<String>,
        format: &str,
    ) -> SubstitutionEnginePayload {
        SubstitutionEnginePayload {
            version: SUBSTITUTION_ENGINE_VERSION.to_string(),
            status: LayerStatus::Skip,
            reason_code: Some(reason_code.to_string()),
            codes: Vec::new(),
            substitutions_version,
            format: format.to_string(),
            buckets: Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Compute per-bucket effective K from primaries and active substitutions.
pub fn run_substitution_engine(
    index: Option<&PrimitiveIndex>,
    requirements: Option<&RequirementDetectionPayload>,
    format: &str,
    substitutions: Option<&BucketSubstitutionsPack>,
) -> SubstitutionEnginePayload {
    let format_token = format.trim();

    let Some(substitutions) = substitutions else {
        return SubstitutionEnginePayload::skip(
            "BUCKET_SUBSTITUTIONS_UNAVAILABLE",
            None,
            format_token,
        );
    };
    let substitutions_version = Some(substitutions.version.clone());

    let Some(index) = index else {
        return SubstitutionEnginePayload::skip(
            "PRIMITIVE_INDEX_UNAVAILABLE",
            substitutions_version,
            format_token,
        );
    };

    let Some(format_entry) = substitutions.format_entry(format_token) else {
        return SubstitutionEnginePayload::skip(
            "FORMAT_BUCKET_SUBSTITUTIONS_UNAVAILABLE",
            substitutions_version,
            format_token,
        );
    };

    let engine_requirements = requirements.and_then(|payload| payload.engine_requirements_v1.as_ref());

    let mut codes: BTreeSet<String> = BTreeSet::new();
    if engine_requirements.is_none() {
        codes.insert("ENGINE_REQUIREMENTS_UNAVAILABLE".to_string());
    }

    let mut bucket_rows = Vec::with_capacity(format_entry.buckets.len());
    for (bucket_id, bucket) in &format_entry.buckets {
        let k_primary = index.count_playable_slots_with_any(&bucket.primary_primitives);

        // Active rows: base plus satisfied conditionals.
        let mut active_rows: Vec<(&String, Fixed6)> = bucket
            .base_substitutions
            .iter()
            .map(|row| (&row.primitive, row.weight))
            .collect();
        let mut active_requirement_flags: BTreeSet<&String> = BTreeSet::new();

        for conditional in &bucket.conditional_substitutions {
            let flag_value = engine_requirements
                .and_then(|requirements| requirements.flag(&conditional.requirement_flag));
            match flag_value {
                None => {
                    codes.insert("SUBSTITUTION_REQUIREMENT_FLAG_UNAVAILABLE".to_string());
                }
                Some(false) => {}
                Some(true) => {
                    active_requirement_flags.insert(&conditional.requirement_flag);
                    for row in &conditional.substitutions {
                        active_rows.push((&row.primitive, row.weight));
                    }
                }
            }
        }

        // Aggregate by primitive; millionths sum exactly.
        let mut aggregated: BTreeMap<&String, Fixed6> = BTreeMap::new();
        for (primitive, weight) in active_rows {
            let entry = aggregated.entry(primitive).or_insert(Fixed6::ZERO);
            *entry = entry.add(weight);
        }

        let mut effective_k = Fixed6::from_int(i64::from(k_primary));
        let mut substitution_terms = Vec::with_capacity(aggregated.len());
        for (primitive, weight) in aggregated {
            let k_substitute = index.count_playable_slots_with(primitive);
            let contribution = weight.mul_int(i64::from(k_substitute));
            effective_k = effective_k.add(contribution);
            substitution_terms.push(SubstitutionTerm {
                primitive: primitive.clone(),
                weight,
                k_substitute,
                contribution,
            });
        }

        let effective_k = effective_k.clamp_deck_size();
        bucket_rows.push(BucketStateRow {
            bucket: bucket_id.clone(),
            k_primary,
            effective_k,
            k_int: effective_k.floor_int(),
            active_requirement_flags: active_requirement_flags
                .into_iter()
                .cloned()
                .collect(),
            substitution_terms,
        });
    }

    let codes_sorted = sorted_codes(&codes);
    SubstitutionEnginePayload {
        version: SUBSTITUTION_ENGINE_VERSION.to_string(),
        status: if codes_sorted.is_empty() {
            LayerStatus::Ok
        } else {
            LayerStatus::Warn
        },
        reason_code: None,
        codes: codes_sorted,
        substitutions_version,
        format: format_token.to_string(),
        buckets: bucket_rows,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::requirement_detection::{CommanderDependence, EngineRequirements};
    use serde_json::json;

    fn index_with(slots: &[(&str, &[&str])]) -> PrimitiveIndex {
        let by_slot: BTreeMap<String, Vec<String>> = slots
            .iter()
            .map(|(slot, primitives)| {
                (
                    slot.to_string(),
                    primitives.iter().map(|p| p.to_string()).collect(),
                )
            })
            .collect();
        let playable = slots.iter().map(|(slot, _)| slot.to_string()).collect();
        PrimitiveIndex::new(by_slot, playable)
    }

    fn substitutions() -> BucketSubstitutionsPack {
        BucketSubstitutionsPack::parse(&json!({
            "version": "bucket_substitutions_v1",
            "format_defaults": {
                "commander": {
                    "buckets": {
                        "RAMP": {
                            "primary_primitives": ["MANA_ROCK"],
                            "base_substitutions": [
                                {"primitive": "COST_REDUCTION", "weight": 0.5}
                            ],
                            "conditional_substitutions": [
                                {
                                    "requirement_flag": "graveyard_engine",
                                    "substitutions": [
                                        {"primitive": "RITUAL", "weight": 0.25},
                                        {"primitive": "COST_REDUCTION", "weight": 0.25}
                                    ]
                                }
                            ]
                        },
                        "REMOVAL": {
                            "primary_primitives": ["SPOT_REMOVAL"],
                            "base_substitutions": [],
                            "conditional_substitutions": []
                        }
                    }
                }
            }
        }))
        .unwrap()
    }

    fn requirements_with(flags: &[(&str, bool)]) -> RequirementDetectionPayload {
        RequirementDetectionPayload {
            version: "engine_requirement_detection_v1".to_string(),
            status: LayerStatus::Ok,
            reason_code: None,
            codes: Vec::new(),
            unknowns: Vec::new(),
            engine_requirements_v1: Some(EngineRequirements {
                flags: flags
                    .iter()
                    .map(|(name, value)| (name.to_string(), *value))
                    .collect(),
                commander_dependent: CommanderDependence::Low,
            }),
        }
    }

    fn deck_index() -> PrimitiveIndex {
        index_with(&[
            ("s1", &["MANA_ROCK"]),
            ("s2", &["MANA_ROCK", "COST_REDUCTION"]),
            ("s3", &["COST_REDUCTION"]),
            ("s4", &["RITUAL"]),
            ("s5", &["SPOT_REMOVAL"]),
        ])
    }

    #[test]
    fn missing_pack_skips_first() {
        let payload = run_substitution_engine(None, None, "commander", None);
        assert_eq!(
            payload.reason_code.as_deref(),
            Some("BUCKET_SUBSTITUTIONS_UNAVAILABLE")
        );
    }

    #[test]
    fn missing_index_skips_with_version() {
        let pack = substitutions();
        let payload = run_substitution_engine(None, None, "commander", Some(&pack));
        assert_eq!(
            payload.reason_code.as_deref(),
            Some("PRIMITIVE_INDEX_UNAVAILABLE")
        );
        assert_eq!(
            payload.substitutions_version.as_deref(),
            Some("bucket_substitutions_v1")
        );
    }

    #[test]
    fn base_only_when_flag_false() {
        let index = deck_index();
        let pack = substitutions();
        let requirements = requirements_with(&[("graveyard_engine", false)]);
        let payload =
            run_substitution_engine(Some(&index), Some(&requirements), "commander", Some(&pack));
        assert_eq!(payload.status, LayerStatus::Ok);

        let ramp = &payload.buckets[0];
        assert_eq!(ramp.bucket, "RAMP");
        assert_eq!(ramp.k_primary, 2);
        // effective_K = 2 + 0.5 * 2 slots with COST_REDUCTION = 3.0
        assert_eq!(ramp.effective_k, Fixed6::from_int(3));
        assert_eq!(ramp.k_int, 3);
        assert!(ramp.active_requirement_flags.is_empty());
    }

    #[test]
    fn conditional_aggregates_by_primitive_when_flag_true() {
        let index = deck_index();
        let pack = substitutions();
        let requirements = requirements_with(&[("graveyard_engine", true)]);
        let payload =
            run_substitution_engine(Some(&index), Some(&requirements), "commander", Some(&pack));

        let ramp = &payload.buckets[0];
        assert_eq!(ramp.active_requirement_flags, ["graveyard_engine"]);
        // COST_REDUCTION aggregates 0.5 + 0.25 = 0.75 across 2 slots;
        // RITUAL contributes 0.25 across 1 slot.
        // effective_K = 2 + 1.5 + 0.25 = 3.75
        assert_eq!(ramp.effective_k.to_string(), "3.750000");
        assert_eq!(ramp.k_int, 3);
        let terms: Vec<&str> = ramp
            .substitution_terms
            .iter()
            .map(|t| t.primitive.as_str())
            .collect();
        assert_eq!(terms, ["COST_REDUCTION", "RITUAL"]);
        assert_eq!(ramp.substitution_terms[0].k_substitute, 2);
        assert_eq!(
            ramp.substitution_terms[0].contribution.to_string(),
            "1.500000"
        );
    }

    #[test]
    fn unknown_flag_warns_and_stays_inactive() {
        let index = deck_index();
        let pack = substitutions();
        let requirements = requirements_with(&[]);
        let payload =
            run_substitution_engine(Some(&index), Some(&requirements), "commander", Some(&pack));
        assert_eq!(payload.status, LayerStatus::Warn);
        assert_eq!(
            payload.codes,
            ["SUBSTITUTION_REQUIREMENT_FLAG_UNAVAILABLE"]
        );
        assert_eq!(payload.buckets[0].effective_k, Fixed6::from_int(3));
    }

    #[test]
    fn missing_requirements_payload_limits_to_base() {
        let index = deck_index();
        let pack = substitutions();
        let payload = run_substitution_engine(Some(&index), None, "commander", Some(&pack));
        assert_eq!(payload.status, LayerStatus::Warn);
        assert_eq!(
            payload.codes,
            [
                "ENGINE_REQUIREMENTS_UNAVAILABLE",
                "SUBSTITUTION_REQUIREMENT_FLAG_UNAVAILABLE"
            ]
        );
        assert_eq!(payload.buckets[0].effective_k, Fixed6::from_int(3));
    }

    #[test]
    fn buckets_ordered_ascending() {
        let index = deck_index();
        let pack = substitutions();
        let requirements = requirements_with(&[("graveyard_engine", false)]);
        let payload =
            run_substitution_engine(Some(&index), Some(&requirements), "commander", Some(&pack));
        let ids: Vec<&str> = payload.buckets.iter().map(|b| b.bucket.as_str()).collect();
        assert_eq!(ids, ["RAMP", "REMOVAL"]);
        assert_eq!(payload.buckets[1].k_primary, 1);
        assert_eq!(payload.buckets[1].effective_k, Fixed6::from_int(1));
    }
}
