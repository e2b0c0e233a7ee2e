//! Required-effects coverage: minimum slot counts per required primitive.
//!
//! Requirements for primitives the runtime taxonomy cannot evaluate become
//! unknowns rather than silent passes; shortfalls become missing rows. The
//! sufficiency summary consumes both lists against its thresholds.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::packs::required_effects::RequiredEffectsPack;
use crate::primitive_index::PrimitiveIndex;
use crate::status::LayerStatus;

pub const REQUIRED_EFFECTS_COVERAGE_VERSION: &str = "required_effects_coverage_v1";

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRow {
    pub primitive: String,
    pub min: u32,
    pub count: Option<u32>,
    pub supported: bool,
    pub met: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingRow {
    pub primitive: String,
    pub min: u32,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownRow {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredEffectsCoveragePayload {
    pub version: String,
    pub status: LayerStatus,
    pub reason_code: Option<String>,
    pub codes: Vec<String>,
    pub requirements_version: String,
    pub coverage: Vec<CoverageRow>,
    pub missing: Vec<MissingRow>,
    pub unknowns: Vec<UnknownRow>,
}

impl RequiredEffectsCoveragePayload {
    fn skip(reason_code: &str, requirements_version: &str) -> RequiredEffectsCoveragePayload {
        RequiredEffectsCoveragePayload {
            version: REQUIRED_EFFECTS_COVERAGE_VERSION.to_string(),
            status: LayerStatus::Skip,
            reason_code: Some(reason_code.to_string()),
            codes: Vec::new(),
            requirements_version: requirements_version.to_string(),
            coverage: Vec::new(),
            missing: Vec::new(),
            unknowns: Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Evaluate required-effect coverage over the playable slots.
pub fn run_required_effects_coverage(
    index: Option<&PrimitiveIndex>,
    format: &str,
    required_effects: Option<&RequiredEffectsPack>,
) -> RequiredEffectsCoveragePayload {
    let requirements_version = required_effects
        .map(|pack| pack.version.clone())
        .unwrap_or_else(|| "required_effects_v1".to_string());

    let Some(required_effects) = required_effects else {
        return RequiredEffectsCoveragePayload::skip(
            "REQUIRED_EFFECTS_UNAVAILABLE",
            &requirements_version,
        );
    };

    let Some(index) = index else {
        return RequiredEffectsCoveragePayload::skip(
            "PRIMITIVE_INDEX_UNAVAILABLE",
            &requirements_version,
        );
    };

    let Some(requirements) = required_effects.requirements_for(format.trim()) else {
        return RequiredEffectsCoveragePayload::skip(
            "REQUIRED_EFFECTS_UNAVAILABLE",
            &requirements_version,
        );
    };

    let mut coverage = Vec::with_capacity(requirements.len());
    let mut missing = Vec::new();
    let mut unknowns = Vec::new();

    for (primitive_id, minimum) in requirements {
        if !required_effects.supports_primitive(primitive_id) {
            coverage.push(CoverageRow {
                primitive: primitive_id.clone(),
                min: *minimum,
                count: None,
                supported: false,
                met: None,
            });
            unknowns.push(UnknownRow {
                code: "REQUIRED_PRIMITIVE_UNSUPPORTED".to_string(),
                message: format!(
                    "Required primitive '{primitive_id}' is unsupported by runtime taxonomy coverage definitions."
                ),
            });
            continue;
        }

        let count = index.count_playable_slots_with(primitive_id);
        let met = count >= *minimum;
        coverage.push(CoverageRow {
            primitive: primitive_id.clone(),
            min: *minimum,
            count: Some(count),
            supported: true,
            met: Some(met),
        });
        if !met {
            missing.push(MissingRow {
                primitive: primitive_id.clone(),
                min: *minimum,
                count,
            });
        }
    }

    unknowns.sort_by(|a, b| (&a.code, &a.message).cmp(&(&b.code, &b.message)));

    let status = if missing.is_empty() && unknowns.is_empty() {
        LayerStatus::Ok
    } else {
        LayerStatus::Warn
    };

    RequiredEffectsCoveragePayload {
        version: REQUIRED_EFFECTS_COVERAGE_VERSION.to_string(),
        status,
        reason_code: None,
        codes: Vec::new(),
        requirements_version,
        coverage,
        missing,
        unknowns,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn pack() -> RequiredEffectsPack {
        RequiredEffectsPack::parse(&json!({
            "version": "required_effects_v1",
            "format_defaults": {
                "commander": {
                    "RAMP": {"min": 2},
                    "CARD_ADVANTAGE": {"min": 1},
                    "FUTURE_PRIMITIVE": {"min": 1}
                }
            },
            "taxonomy_primitive_ids": ["RAMP", "CARD_ADVANTAGE"]
        }))
        .unwrap()
    }

    fn index() -> PrimitiveIndex {
        let mut by_slot: BTreeMap<String, Vec<String>> = BTreeMap::new();
        by_slot.insert("s1".to_string(), vec!["RAMP".to_string()]);
        by_slot.insert("s2".to_string(), vec!["RAMP".to_string()]);
        by_slot.insert("s3".to_string(), vec!["DRAW".to_string()]);
        PrimitiveIndex::new(
            by_slot,
            vec!["s1".to_string(), "s2".to_string(), "s3".to_string()],
        )
    }

    #[test]
    fn missing_pack_skips() {
        let payload = run_required_effects_coverage(Some(&index()), "commander", None);
        assert_eq!(
            payload.reason_code.as_deref(),
            Some("REQUIRED_EFFECTS_UNAVAILABLE")
        );
    }

    #[test]
    fn coverage_rows_sorted_with_missing_and_unknowns() {
        let pack = pack();
        let payload = run_required_effects_coverage(Some(&index()), "commander", Some(&pack));
        assert_eq!(payload.status, LayerStatus::Warn);

        let primitives: Vec<&str> = payload
            .coverage
            .iter()
            .map(|row| row.primitive.as_str())
            .collect();
        assert_eq!(primitives, ["CARD_ADVANTAGE", "FUTURE_PRIMITIVE", "RAMP"]);

        // RAMP is met (2 >= 2), CARD_ADVANTAGE is missing (0 < 1).
        assert_eq!(payload.missing.len(), 1);
        assert_eq!(payload.missing[0].primitive, "CARD_ADVANTAGE");
        assert_eq!(payload.missing[0].count, 0);

        // FUTURE_PRIMITIVE is outside the taxonomy list.
        assert_eq!(payload.unknowns.len(), 1);
        assert_eq!(payload.unknowns[0].code, "REQUIRED_PRIMITIVE_UNSUPPORTED");
        let future = payload
            .coverage
            .iter()
            .find(|row| row.primitive == "FUTURE_PRIMITIVE")
            .unwrap();
        assert!(!future.supported);
        assert_eq!(future.count, None);
        assert_eq!(future.met, None);
    }

    #[test]
    fn fully_met_requirements_are_ok() {
        let pack = RequiredEffectsPack::parse(&json!({
            "version": "required_effects_v1",
            "format_defaults": {"commander": {"RAMP": {"min": 1}}},
            "taxonomy_primitive_ids": ["RAMP"]
        }))
        .unwrap();
        let payload = run_required_effects_coverage(Some(&index()), "commander", Some(&pack));
        assert_eq!(payload.status, LayerStatus::Ok);
        assert!(payload.missing.is_empty());
        assert!(payload.unknowns.is_empty());
    }
}
