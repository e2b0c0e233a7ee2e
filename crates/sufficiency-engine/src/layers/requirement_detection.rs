//! Requirement detection: boolean engine requirements plus the commander
//! dependence class, derived from the primitive index and the dependency
//! signature pack.
//!
//! Signature evaluation is any-of over primitive slot coverage. Three
//! requirement evaluators are not realized yet and always surface their
//! explicit unimplemented codes with fixed flag values.

use std::collections::{BTreeMap, BTreeSet};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::norm::sorted_codes;
use crate::packs::dependency_signatures::DependencySignaturesPack;
use crate::primitive_index::PrimitiveIndex;
use crate::status::LayerStatus;

pub const REQUIREMENT_DETECTION_VERSION: &str = "engine_requirement_detection_v1";

/// Signature primitives with this prefix are placeholders the compiler
/// could not resolve; they always count as unknown.
const UNKNOWN_PRIMITIVE_MARKER: &str = "UNKNOWN_PRIMITIVE_ID::";

/// Overlap ratio at which commander dependence is classified HIGH.
const HIGH_DEPENDENCE_OVERLAP_RATIO_MICROS: i64 = 500_000;

// ---------------------------------------------------------------------------
// CommanderDependence
// ---------------------------------------------------------------------------

/// Categorical commander-dependence class. LOW disables commander
/// fragility penalties downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CommanderDependence {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl CommanderDependence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Unknown => "UNKNOWN",
        }
    }
}

// ---------------------------------------------------------------------------
// EngineRequirements
// ---------------------------------------------------------------------------

/// Requirement flags plus fixed not-yet-implemented entries.
///
/// Serialized as one flat object: signature flags, `commander_dependent`,
/// and the fixed `mana_hungry` / `requires_shuffle` /
/// `requires_specific_permanent_type` values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineRequirements {
    pub flags: BTreeMap<String, bool>,
    pub commander_dependent: CommanderDependence,
}

impl EngineRequirements {
    /// Boolean flag lookup by name. Non-boolean entries (the commander
    /// class, the permanent-type list) return `None`.
    pub fn flag(&self, name: &str) -> Option<bool> {
        if let Some(value) = self.flags.get(name) {
            return Some(*value);
        }
        match name {
            "mana_hungry" | "requires_shuffle" => Some(false),
            _ => None,
        }
    }
}

impl Serialize for EngineRequirements {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (flag, value) in &self.flags {
            map.serialize_entry(flag, value)?;
        }
        map.serialize_entry("commander_dependent", self.commander_dependent.as_str())?;
        map.serialize_entry("mana_hungry", &false)?;
        map.serialize_entry("requires_shuffle", &false)?;
        map.serialize_entry("requires_specific_permanent_type", &Vec::<String>::new())?;
        map.end()
    }
}

fn serialize_requirements_or_empty<S: Serializer>(
    value: &Option<EngineRequirements>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(requirements) => requirements.serialize(serializer),
        None => serializer.serialize_map(Some(0))?.end(),
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Unknown-primitive report row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownPrimitiveReport {
    pub code: String,
    pub primitive_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequirementDetectionPayload {
    pub version: String,
    pub status: LayerStatus,
    pub reason_code: Option<String>,
    pub codes: Vec<String>,
    pub unknowns: Vec<UnknownPrimitiveReport>,
    #[serde(serialize_with = "serialize_requirements_or_empty")]
    pub engine_requirements_v1: Option<EngineRequirements>,
}

impl RequirementDetectionPayload {
    fn skip(reason_code: &str) -> RequirementDetectionPayload {
        RequirementDetectionPayload {
            version: REQUIREMENT_DETECTION_VERSION.to_string(),
            status: LayerStatus::Skip,
            reason_code: Some(reason_code.to_string()),
            codes: Vec::new(),
            unknowns: Vec::new(),
            engine_requirements_v1: None,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Commander dependence classification
// ---------------------------------------------------------------------------

fn classify_commander_dependence(
    index: &PrimitiveIndex,
    commander_slot_id: Option<&str>,
    codes: &mut BTreeSet<String>,
) -> CommanderDependence {
    let Some(commander_slot) = commander_slot_id else {
        codes.insert("COMMANDER_SLOT_ID_MISSING".to_string());
        return CommanderDependence::Unknown;
    };

    let commander_primitives: BTreeSet<&String> =
        index.primitives_for_slot(commander_slot).iter().collect();
    if commander_primitives.is_empty() {
        return CommanderDependence::Low;
    }

    let mut overlapping_slots: u32 = 0;
    let mut eligible_slots: u32 = 0;
    for slot_id in index.playable_slot_ids() {
        if slot_id == commander_slot {
            continue;
        }
        eligible_slots += 1;
        let shares = index
            .primitives_for_slot(slot_id)
            .iter()
            .any(|primitive| commander_primitives.contains(primitive));
        if shares {
            overlapping_slots += 1;
        }
    }

    if overlapping_slots == 0 || eligible_slots == 0 {
        return CommanderDependence::Low;
    }
    let ratio = crate::fixed::Fixed6::from_ratio_u128(
        u128::from(overlapping_slots),
        u128::from(eligible_slots),
    );
    if ratio.micros() >= HIGH_DEPENDENCE_OVERLAP_RATIO_MICROS {
        CommanderDependence::High
    } else {
        CommanderDependence::Medium
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Detect engine requirements from the primitive index.
pub fn run_requirement_detection(
    index: Option<&PrimitiveIndex>,
    commander_slot_id: Option<&str>,
    signatures: Option<&DependencySignaturesPack>,
) -> RequirementDetectionPayload {
    let Some(index) = index.filter(|index| index.is_populated()) else {
        return RequirementDetectionPayload::skip("PRIMITIVE_INDEX_UNAVAILABLE");
    };

    let mut codes: BTreeSet<String> = [
        "ENGINE_REQ_MANA_HUNGRY_UNIMPLEMENTED".to_string(),
        "ENGINE_REQ_PERMANENT_TYPE_UNIMPLEMENTED".to_string(),
        "ENGINE_REQ_SHUFFLE_UNIMPLEMENTED".to_string(),
    ]
    .into_iter()
    .collect();

    let mut unknown_primitive_ids: BTreeSet<String> = BTreeSet::new();
    let mut flags: BTreeMap<String, bool> = BTreeMap::new();

    if let Some(signatures) = signatures {
        for (signature_name, rule) in &signatures.signatures {
            let mut matched = false;
            for primitive_id in &rule.any_required_primitives {
                let has_slots = !index.slots_for_primitive(primitive_id).is_empty();
                if has_slots {
                    matched = true;
                }
                if primitive_id.starts_with(UNKNOWN_PRIMITIVE_MARKER) || !has_slots {
                    unknown_primitive_ids.insert(primitive_id.clone());
                }
            }
            flags.insert(signature_name.clone(), matched);
        }
    }

    if !unknown_primitive_ids.is_empty() {
        codes.insert("UNKNOWN_PRIMITIVE_ID_IN_SIGNATURES".to_string());
    }

    let commander_dependent = classify_commander_dependence(index, commander_slot_id, &mut codes);

    let unknowns = if unknown_primitive_ids.is_empty() {
        Vec::new()
    } else {
        vec![UnknownPrimitiveReport {
            code: "UNKNOWN_PRIMITIVE_ID_IN_SIGNATURES".to_string(),
            primitive_ids: unknown_primitive_ids.into_iter().collect(),
        }]
    };

    let codes_sorted = sorted_codes(&codes);
    let status = if codes_sorted.is_empty() && unknowns.is_empty() {
        LayerStatus::Ok
    } else {
        LayerStatus::Warn
    };

    RequirementDetectionPayload {
        version: REQUIREMENT_DETECTION_VERSION.to_string(),
        status,
        reason_code: None,
        codes: codes_sorted,
        unknowns,
        engine_requirements_v1: Some(EngineRequirements {
            flags,
            commander_dependent,
        }),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index_with(slots: &[(&str, &[&str])], playable: &[&str]) -> PrimitiveIndex {
        let by_slot: BTreeMap<String, Vec<String>> = slots
            .iter()
            .map(|(slot, primitives)| {
                (
                    slot.to_string(),
                    primitives.iter().map(|p| p.to_string()).collect(),
                )
            })
            .collect();
        PrimitiveIndex::new(by_slot, playable.iter().map(|s| s.to_string()).collect())
    }

    fn signatures() -> DependencySignaturesPack {
        DependencySignaturesPack::parse(&json!({
            "version": "dependency_signatures_v1",
            "signatures": {
                "ramp_engine": {"any_required_primitives": ["RAMP"]},
                "graveyard_engine": {"any_required_primitives": ["RECURSION"]}
            }
        }))
        .unwrap()
    }

    #[test]
    fn missing_index_skips() {
        let payload = run_requirement_detection(None, None, Some(&signatures()));
        assert_eq!(payload.status, LayerStatus::Skip);
        assert_eq!(
            payload.reason_code.as_deref(),
            Some("PRIMITIVE_INDEX_UNAVAILABLE")
        );
        assert!(payload.engine_requirements_v1.is_none());
    }

    #[test]
    fn signature_flags_match_any_of() {
        let index = index_with(
            &[("s1", &["RAMP"]), ("s2", &["DRAW"]), ("cmd", &[])],
            &["s1", "s2"],
        );
        let payload = run_requirement_detection(Some(&index), Some("cmd"), Some(&signatures()));
        let requirements = payload.engine_requirements_v1.unwrap();
        assert_eq!(requirements.flag("ramp_engine"), Some(true));
        // RECURSION covers no slot: flag false and primitive reported.
        assert_eq!(requirements.flag("graveyard_engine"), Some(false));
        assert_eq!(payload.unknowns.len(), 1);
        assert_eq!(payload.unknowns[0].primitive_ids, ["RECURSION"]);
        assert!(payload
            .codes
            .contains(&"UNKNOWN_PRIMITIVE_ID_IN_SIGNATURES".to_string()));
    }

    #[test]
    fn unimplemented_codes_always_present_and_sorted() {
        let index = index_with(&[("s1", &["RAMP"]), ("cmd", &[])], &["s1"]);
        let payload = run_requirement_detection(Some(&index), Some("cmd"), None);
        assert_eq!(payload.status, LayerStatus::Warn);
        let mut sorted = payload.codes.clone();
        sorted.sort();
        assert_eq!(payload.codes, sorted);
        assert!(payload
            .codes
            .contains(&"ENGINE_REQ_SHUFFLE_UNIMPLEMENTED".to_string()));
    }

    #[test]
    fn missing_commander_slot_is_unknown_with_code() {
        let index = index_with(&[("s1", &["RAMP"])], &["s1"]);
        let payload = run_requirement_detection(Some(&index), None, Some(&signatures()));
        let requirements = payload.engine_requirements_v1.unwrap();
        assert_eq!(
            requirements.commander_dependent,
            CommanderDependence::Unknown
        );
        assert!(payload
            .codes
            .contains(&"COMMANDER_SLOT_ID_MISSING".to_string()));
    }

    #[test]
    fn commander_with_no_primitives_is_low() {
        let index = index_with(&[("s1", &["RAMP"]), ("cmd", &[])], &["s1", "cmd"]);
        let payload = run_requirement_detection(Some(&index), Some("cmd"), Some(&signatures()));
        assert_eq!(
            payload.engine_requirements_v1.unwrap().commander_dependent,
            CommanderDependence::Low
        );
    }

    #[test]
    fn overlap_ratio_decides_medium_vs_high() {
        // One of four non-commander slots overlaps: MEDIUM.
        let medium_index = index_with(
            &[
                ("cmd", &["RECURSION"]),
                ("s1", &["RECURSION"]),
                ("s2", &["RAMP"]),
                ("s3", &["DRAW"]),
                ("s4", &["DRAW"]),
            ],
            &["cmd", "s1", "s2", "s3", "s4"],
        );
        let payload = run_requirement_detection(Some(&medium_index), Some("cmd"), None);
        assert_eq!(
            payload.engine_requirements_v1.unwrap().commander_dependent,
            CommanderDependence::Medium
        );

        // Both non-commander slots overlap: HIGH.
        let high_index = index_with(
            &[
                ("cmd", &["RECURSION"]),
                ("s1", &["RECURSION"]),
                ("s2", &["RECURSION", "RAMP"]),
            ],
            &["cmd", "s1", "s2"],
        );
        let payload = run_requirement_detection(Some(&high_index), Some("cmd"), None);
        assert_eq!(
            payload.engine_requirements_v1.unwrap().commander_dependent,
            CommanderDependence::High
        );
    }

    #[test]
    fn fixed_flags_are_queryable_and_serialized() {
        let index = index_with(&[("s1", &["RAMP"]), ("cmd", &[])], &["s1"]);
        let payload = run_requirement_detection(Some(&index), Some("cmd"), Some(&signatures()));
        let requirements = payload.engine_requirements_v1.as_ref().unwrap();
        assert_eq!(requirements.flag("mana_hungry"), Some(false));
        assert_eq!(requirements.flag("commander_dependent"), None);
        assert_eq!(requirements.flag("unheard_of_flag"), None);

        let value = payload.to_value();
        assert_eq!(value["engine_requirements_v1"]["mana_hungry"], json!(false));
        assert_eq!(
            value["engine_requirements_v1"]["requires_specific_permanent_type"],
            json!([])
        );
    }

    #[test]
    fn skip_serializes_empty_requirements_object() {
        let payload = run_requirement_detection(None, None, None);
        let value = payload.to_value();
        assert_eq!(value["engine_requirements_v1"], json!({}));
    }
}
