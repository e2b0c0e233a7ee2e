//! Weight multiplier engine: stacked conditional multipliers per bucket.
//!
//! Candidate buckets are the deterministic union of substitution buckets
//! and rule targets, each starting at 1.0. A rule applies only when its
//! requirement flag is exactly boolean true; active multipliers stack
//! multiplicatively in rule order.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fixed::Fixed6;
use crate::layers::requirement_detection::RequirementDetectionPayload;
use crate::layers::substitution_engine::SubstitutionEnginePayload;
use crate::norm::sorted_codes;
use crate::packs::weight_rules::WeightRulesPack;
use crate::status::LayerStatus;

pub const WEIGHT_MULTIPLIER_VERSION: &str = "weight_multiplier_engine_v1";

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketMultiplierRow {
    pub bucket: String,
    pub multiplier: Fixed6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRuleRow {
    pub rule_id: String,
    pub target_bucket: String,
    pub requirement_flag: String,
    pub multiplier: Fixed6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightMultiplierPayload {
    pub version: String,
    pub status: LayerStatus,
    pub reason_code: Option<String>,
    pub codes: Vec<String>,
    pub weight_rules_version: Option<String>,
    pub format: String,
    pub multipliers_by_bucket: Vec<BucketMultiplierRow>,
    pub applied_rules: Vec<AppliedRuleRow>,
}

impl WeightMultiplierPayload {
    fn skip(
        reason_code: &str,
        weight_rules_version: Option<String>,
        format: &str,
    ) -> WeightMultiplierPayload {
        WeightMultiplierPayload {
            version: WEIGHT_MULTIPLIER_VERSION.to_string(),
            status: LayerStatus::Skip,
            reason_code: Some(reason_code.to_string()),
            codes: Vec::new(),
            weight_rules_version,
            format: format.to_string(),
            multipliers_by_bucket: Vec::new(),
            applied_rules: Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Evaluate the multiplier rules for one format.
pub fn run_weight_multiplier(
    requirements: Option<&RequirementDetectionPayload>,
    substitution: Option<&SubstitutionEnginePayload>,
    format: &str,
    weight_rules: Option<&WeightRulesPack>,
) -> WeightMultiplierPayload {
    let format_token = format.trim();

    let Some(weight_rules) = weight_rules else {
        return WeightMultiplierPayload::skip("WEIGHT_RULES_UNAVAILABLE", None, format_token);
    };
    let weight_rules_version = Some(weight_rules.version.clone());

    let Some(format_entry) = weight_rules.format_entry(format_token) else {
        return WeightMultiplierPayload::skip(
            "FORMAT_WEIGHT_RULES_UNAVAILABLE",
            weight_rules_version,
            format_token,
        );
    };

    let engine_requirements = requirements.and_then(|payload| payload.engine_requirements_v1.as_ref());

    let mut codes: BTreeSet<String> = BTreeSet::new();
    if engine_requirements.is_none() {
        codes.insert("ENGINE_REQUIREMENTS_UNAVAILABLE".to_string());
    }

    // Candidate buckets: substitution buckets plus rule targets.
    let mut candidate_buckets: BTreeSet<String> = BTreeSet::new();
    if let Some(substitution) = substitution {
        for row in &substitution.buckets {
            candidate_buckets.insert(row.bucket.clone());
        }
    }
    for rule in &format_entry.rules {
        candidate_buckets.insert(rule.target_bucket.clone());
    }

    let mut multiplier_by_bucket: BTreeMap<&String, Fixed6> = candidate_buckets
        .iter()
        .map(|bucket| (bucket, Fixed6::ONE))
        .collect();

    let mut applied_rules = Vec::new();
    for rule in &format_entry.rules {
        let flag_value =
            engine_requirements.and_then(|requirements| requirements.flag(&rule.requirement_flag));
        match flag_value {
            None => {
                codes.insert("WEIGHT_RULE_REQUIREMENT_FLAG_UNAVAILABLE".to_string());
                continue;
            }
            Some(false) => continue,
            Some(true) => {}
        }

        if let Some(current) = multiplier_by_bucket.get_mut(&rule.target_bucket) {
            *current = current.mul(rule.multiplier);
        }
        applied_rules.push(AppliedRuleRow {
            rule_id: rule.rule_id.clone(),
            target_bucket: rule.target_bucket.clone(),
            requirement_flag: rule.requirement_flag.clone(),
            multiplier: rule.multiplier,
        });
    }

    let multipliers_by_bucket = multiplier_by_bucket
        .into_iter()
        .map(|(bucket, multiplier)| BucketMultiplierRow {
            bucket: bucket.clone(),
            multiplier,
        })
        .collect();

    let codes_sorted = sorted_codes(&codes);
    WeightMultiplierPayload {
        version: WEIGHT_MULTIPLIER_VERSION.to_string(),
        status: if codes_sorted.is_empty() {
            LayerStatus::Ok
        } else {
            LayerStatus::Warn
        },
        reason_code: None,
        codes: codes_sorted,
        weight_rules_version,
        format: format_token.to_string(),
        multipliers_by_bucket,
        applied_rules,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
