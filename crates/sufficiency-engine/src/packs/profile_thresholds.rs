//! `profile_thresholds_v1` pack and resolver.
//!
//! Per-format profiles, each carrying the six domain threshold blocks the
//! sufficiency summary evaluates. Domain key sets are exact; unknown or
//! missing keys are an invalid pack, not a default.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    read_pack_json, require_nonempty_str, require_nonnegative_int, require_object,
    require_unit_number, PackError,
};
use crate::fixed::Fixed6;

pub const PROFILE_THRESHOLDS_VERSION: &str = "profile_thresholds_v1";
const PACK: &str = "PROFILE_THRESHOLDS_V1";

/// Fixed domain key order used everywhere thresholds are evaluated.
pub const DOMAIN_ORDER: [&str; 6] = [
    "required_effects",
    "baseline_prob",
    "stress_prob",
    "coherence",
    "resilience",
    "commander",
];

// ---------------------------------------------------------------------------
// Domain threshold blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredEffectsThresholds {
    pub max_missing: u32,
    pub max_unknowns: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineProbThresholds {
    pub cast_reliability_t3_min: Fixed6,
    pub cast_reliability_t4_min: Fixed6,
    pub cast_reliability_t6_min: Fixed6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressProbThresholds {
    pub engine_continuity_after_removal_min: Fixed6,
    pub rebuild_after_wipe_min: Fixed6,
    pub graveyard_fragility_delta_max: Fixed6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoherenceThresholds {
    pub dead_slot_ratio_max: Fixed6,
    pub overlap_score_min: Fixed6,
    /// Optional in the pack; defaults to zero.
    pub bridge_amplification_bonus_v1: Fixed6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResilienceThresholds {
    pub commander_fragility_delta_max: Fixed6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommanderThresholds {
    pub protection_coverage_proxy_min: Fixed6,
    pub commander_fragility_delta_max: Fixed6,
}

/// All six domain blocks for one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainThresholds {
    pub required_effects: RequiredEffectsThresholds,
    pub baseline_prob: BaselineProbThresholds,
    pub stress_prob: StressProbThresholds,
    pub coherence: CoherenceThresholds,
    pub resilience: ResilienceThresholds,
    pub commander: CommanderThresholds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDefinition {
    pub domains: DomainThresholds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatProfiles {
    pub default_profile_id: String,
    pub profiles: BTreeMap<String, ProfileDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileThresholdsPack {
    pub version: String,
    pub calibration_snapshot_version: String,
    pub format_defaults: BTreeMap<String, FormatProfiles>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn check_exact_keys(raw: &Value, expected: &[&str], field_path: &str) -> Result<(), PackError> {
    let object = raw
        .as_object()
        .ok_or_else(|| PackError::invalid(PACK, &format!("{field_path} must be an object")))?;
    let mut actual: Vec<&str> = object.keys().map(String::as_str).collect();
    actual.sort_unstable();
    let mut wanted: Vec<&str> = expected.to_vec();
    wanted.sort_unstable();
    if actual != wanted {
        return Err(PackError::invalid(
            PACK,
            &format!("{field_path} keys must be exactly {wanted:?}"),
        ));
    }
    Ok(())
}

fn unit_field(raw: &Value, key: &str, field_path: &str) -> Result<Fixed6, PackError> {
    let value = require_unit_number(
        PACK,
        raw.get(key).unwrap_or(&Value::Null),
        &format!("{field_path}.{key}"),
    )?;
    Fixed6::quantize_f64(value)
        .ok_or_else(|| PackError::invalid(PACK, &format!("{field_path}.{key} must be finite")))
}

fn parse_domains(raw: &Value, field_path: &str) -> Result<DomainThresholds, PackError> {
    check_exact_keys(raw, &DOMAIN_ORDER, field_path)?;

    let required_effects_raw = &raw["required_effects"];
    check_exact_keys(
        required_effects_raw,
        &["max_missing", "max_unknowns"],
        &format!("{field_path}.required_effects"),
    )?;
    let required_effects = RequiredEffectsThresholds {
        max_missing: require_nonnegative_int(
            PACK,
            &required_effects_raw["max_missing"],
            &format!("{field_path}.required_effects.max_missing"),
        )?,
        max_unknowns: require_nonnegative_int(
            PACK,
            &required_effects_raw["max_unknowns"],
            &format!("{field_path}.required_effects.max_unknowns"),
        )?,
    };

    let baseline_raw = &raw["baseline_prob"];
    check_exact_keys(
        baseline_raw,
        &[
            "cast_reliability_t3_min",
            "cast_reliability_t4_min",
            "cast_reliability_t6_min",
        ],
        &format!("{field_path}.baseline_prob"),
    )?;
    let baseline_path = format!("{field_path}.baseline_prob");
    let baseline_prob = BaselineProbThresholds {
        cast_reliability_t3_min: unit_field(baseline_raw, "cast_reliability_t3_min", &baseline_path)?,
        cast_reliability_t4_min: unit_field(baseline_raw, "cast_reliability_t4_min", &baseline_path)?,
        cast_reliability_t6_min: unit_field(baseline_raw, "cast_reliability_t6_min", &baseline_path)?,
    };

    let stress_raw = &raw["stress_prob"];
    check_exact_keys(
        stress_raw,
        &[
            "engine_continuity_after_removal_min",
            "graveyard_fragility_delta_max",
            "rebuild_after_wipe_min",
        ],
        &format!("{field_path}.stress_prob"),
    )?;
    let stress_path = format!("{field_path}.stress_prob");
    let stress_prob = StressProbThresholds {
        engine_continuity_after_removal_min: unit_field(
            stress_raw,
            "engine_continuity_after_removal_min",
            &stress_path,
        )?,
        rebuild_after_wipe_min: unit_field(stress_raw, "rebuild_after_wipe_min", &stress_path)?,
        graveyard_fragility_delta_max: unit_field(
            stress_raw,
            "graveyard_fragility_delta_max",
            &stress_path,
        )?,
    };

    let coherence_raw = &raw["coherence"];
    let coherence_path = format!("{field_path}.coherence");
    let coherence_object = coherence_raw
        .as_object()
        .ok_or_else(|| PackError::invalid(PACK, &format!("{coherence_path} must be an object")))?;
    for key in coherence_object.keys() {
        if !matches!(
            key.as_str(),
            "dead_slot_ratio_max" | "overlap_score_min" | "bridge_amplification_bonus_v1"
        ) {
            return Err(PackError::invalid(
                PACK,
                &format!("{coherence_path} has unknown key: {key}"),
            ));
        }
    }
    let bridge_bonus = if coherence_object.contains_key("bridge_amplification_bonus_v1") {
        unit_field(coherence_raw, "bridge_amplification_bonus_v1", &coherence_path)?
    } else {
        Fixed6::ZERO
    };
    let coherence = CoherenceThresholds {
        dead_slot_ratio_max: unit_field(coherence_raw, "dead_slot_ratio_max", &coherence_path)?,
        overlap_score_min: unit_field(coherence_raw, "overlap_score_min", &coherence_path)?,
        bridge_amplification_bonus_v1: bridge_bonus,
    };

    let resilience_raw = &raw["resilience"];
    check_exact_keys(
        resilience_raw,
        &["commander_fragility_delta_max"],
        &format!("{field_path}.resilience"),
    )?;
    let resilience = ResilienceThresholds {
        commander_fragility_delta_max: unit_field(
            resilience_raw,
            "commander_fragility_delta_max",
            &format!("{field_path}.resilience"),
        )?,
    };

    let commander_raw = &raw["commander"];
    check_exact_keys(
        commander_raw,
        &["commander_fragility_delta_max", "protection_coverage_proxy_min"],
        &format!("{field_path}.commander"),
    )?;
    let commander_path = format!("{field_path}.commander");
    let commander = CommanderThresholds {
        protection_coverage_proxy_min: unit_field(
            commander_raw,
            "protection_coverage_proxy_min",
            &commander_path,
        )?,
        commander_fragility_delta_max: unit_field(
            commander_raw,
            "commander_fragility_delta_max",
            &commander_path,
        )?,
    };

    Ok(DomainThresholds {
        required_effects,
        baseline_prob,
        stress_prob,
        coherence,
        resilience,
        commander,
    })
}

impl ProfileThresholdsPack {
    pub fn parse(document: &Value) -> Result<ProfileThresholdsPack, PackError> {
        require_object(PACK, document, "root")?;

        let version = super::require_exact_version(PACK, document, PROFILE_THRESHOLDS_VERSION)?;
        let calibration_snapshot_version = require_nonempty_str(
            PACK,
            document
                .get("calibration_snapshot_version")
                .unwrap_or(&Value::Null),
            "calibration_snapshot_version",
        )?;

        let format_defaults_raw = document
            .get("format_defaults")
            .and_then(Value::as_object)
            .ok_or_else(|| PackError::invalid(PACK, "format_defaults must be an object"))?;

        let mut format_defaults = BTreeMap::new();
        for (format_key, format_payload) in format_defaults_raw {
            let format_key = crate::norm::nonempty_token(format_key).ok_or_else(|| {
                PackError::invalid(PACK, "format_defaults keys must be non-empty strings")
            })?;
            let field_path = format!("format_defaults.{format_key}");
            check_exact_keys(
                format_payload,
                &["default_profile_id", "profiles"],
                &field_path,
            )?;

            let profiles_raw = format_payload
                .get("profiles")
                .and_then(Value::as_object)
                .filter(|map| !map.is_empty())
                .ok_or_else(|| {
                    PackError::invalid(PACK, &format!("{field_path}.profiles must be non-empty"))
                })?;

            let mut profiles = BTreeMap::new();
            for (profile_key, profile_payload) in profiles_raw {
                let profile_key = crate::norm::nonempty_token(profile_key).ok_or_else(|| {
                    PackError::invalid(PACK, &format!("{field_path}.profiles keys must be non-empty strings"))
                })?;
                let profile_path = format!("{field_path}.profiles.{profile_key}");
                check_exact_keys(profile_payload, &["domains"], &profile_path)?;
                profiles.insert(
                    profile_key,
                    ProfileDefinition {
                        domains: parse_domains(
                            &profile_payload["domains"],
                            &format!("{profile_path}.domains"),
                        )?,
                    },
                );
            }

            let default_profile_id = require_nonempty_str(
                PACK,
                format_payload.get("default_profile_id").unwrap_or(&Value::Null),
                &format!("{field_path}.default_profile_id"),
            )?;
            if !profiles.contains_key(&default_profile_id) {
                return Err(PackError::invalid(
                    PACK,
                    &format!("{field_path}.default_profile_id must reference an existing profile"),
                ));
            }

            format_defaults.insert(
                format_key,
                FormatProfiles {
                    default_profile_id,
                    profiles,
                },
            );
        }

        Ok(ProfileThresholdsPack {
            version,
            calibration_snapshot_version,
            format_defaults,
        })
    }

    pub fn load(path: &Path) -> Result<ProfileThresholdsPack, PackError> {
        Self::parse(&read_pack_json(PACK, path)?)
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// How the selected profile was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileSelectionSource {
    #[serde(rename = "profile")]
    Profile,
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "first_sorted")]
    FirstSorted,
    #[serde(rename = "unavailable")]
    Unavailable,
}

impl ProfileSelectionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Default => "default",
            Self::FirstSorted => "first_sorted",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Resolved thresholds for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedThresholds {
    pub profile_thresholds_version: String,
    pub calibration_snapshot_version: String,
    pub format: String,
    pub requested_profile_id: String,
    pub selected_profile_id: String,
    pub selection_source: ProfileSelectionSource,
    pub domains: Option<DomainThresholds>,
}

impl ProfileThresholdsPack {
    /// Resolve thresholds for a format/profile pair.
    ///
    /// Requested profile wins when present; otherwise the format default;
    /// otherwise the first profile in sorted order.
    pub fn resolve(&self, format: &str, profile_id: &str) -> ResolvedThresholds {
        let format_token = format.trim();
        let requested = profile_id.trim();

        let format_entry = self
            .format_defaults
            .get(format_token)
            .or_else(|| self.format_defaults.get(&format_token.to_lowercase()));

        let Some(format_entry) = format_entry else {
            return ResolvedThresholds {
                profile_thresholds_version: self.version.clone(),
                calibration_snapshot_version: self.calibration_snapshot_version.clone(),
                format: format_token.to_string(),
                requested_profile_id: requested.to_string(),
                selected_profile_id: String::new(),
                selection_source: ProfileSelectionSource::Unavailable,
                domains: None,
            };
        };

        let (selected_profile_id, selection_source) =
            if format_entry.profiles.contains_key(requested) {
                (requested.to_string(), ProfileSelectionSource::Profile)
            } else if format_entry
                .profiles
                .contains_key(&format_entry.default_profile_id)
            {
                (
                    format_entry.default_profile_id.clone(),
                    ProfileSelectionSource::Default,
                )
            } else if let Some(first) = format_entry.profiles.keys().next() {
                (first.clone(), ProfileSelectionSource::FirstSorted)
            } else {
                (String::new(), ProfileSelectionSource::Unavailable)
            };

        let domains = format_entry
            .profiles
            .get(&selected_profile_id)
            .map(|profile| profile.domains.clone());

        ResolvedThresholds {
            profile_thresholds_version: self.version.clone(),
            calibration_snapshot_version: self.calibration_snapshot_version.clone(),
            format: format_token.to_string(),
            requested_profile_id: requested.to_string(),
            selected_profile_id,
            selection_source,
            domains,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn domains_doc() -> Value {
        json!({
            "required_effects": {"max_missing": 0, "max_unknowns": 2},
            "baseline_prob": {
                "cast_reliability_t3_min": 0.6,
                "cast_reliability_t4_min": 0.75,
                "cast_reliability_t6_min": 0.9
            },
            "stress_prob": {
                "engine_continuity_after_removal_min": 0.5,
                "rebuild_after_wipe_min": 0.4,
                "graveyard_fragility_delta_max": 0.25
            },
            "coherence": {"dead_slot_ratio_max": 0.05, "overlap_score_min": 0.02},
            "resilience": {"commander_fragility_delta_max": 0.2},
            "commander": {
                "protection_coverage_proxy_min": 0.03,
                "commander_fragility_delta_max": 0.2
            }
        })
    }

    pub(crate) fn pack_doc() -> Value {
        json!({
            "version": "profile_thresholds_v1",
            "calibration_snapshot_version": "calibration_snapshot_v1@2025-06",
            "format_defaults": {
                "commander": {
                    "default_profile_id": "focused",
                    "profiles": {
                        "casual": {"domains": domains_doc()},
                        "focused": {"domains": domains_doc()}
                    }
                }
            }
        })
    }

    #[test]
    fn parses_full_pack() {
        let pack = ProfileThresholdsPack::parse(&pack_doc()).unwrap();
        let focused = &pack.format_defaults["commander"].profiles["focused"];
        assert_eq!(
            focused.domains.baseline_prob.cast_reliability_t3_min.micros(),
            600_000
        );
        assert_eq!(
            focused.domains.coherence.bridge_amplification_bonus_v1,
            Fixed6::ZERO
        );
    }

    #[test]
    fn missing_domain_key_rejected() {
        let mut doc = pack_doc();
        doc["format_defaults"]["commander"]["profiles"]["focused"]["domains"]
            .as_object_mut()
            .unwrap()
            .remove("resilience");
        assert!(ProfileThresholdsPack::parse(&doc).is_err());
    }

    #[test]
    fn unknown_coherence_key_rejected() {
        let mut doc = pack_doc();
        doc["format_defaults"]["commander"]["profiles"]["focused"]["domains"]["coherence"]
            ["surprise"] = json!(0.1);
        assert!(ProfileThresholdsPack::parse(&doc).is_err());
    }

    #[test]
    fn default_profile_must_exist() {
        let mut doc = pack_doc();
        doc["format_defaults"]["commander"]["default_profile_id"] = json!("missing");
        assert!(ProfileThresholdsPack::parse(&doc).is_err());
    }

    #[test]
    fn missing_calibration_version_rejected() {
        let mut doc = pack_doc();
        doc.as_object_mut()
            .unwrap()
            .remove("calibration_snapshot_version");
        assert!(ProfileThresholdsPack::parse(&doc).is_err());
    }

    #[test]
    fn resolve_requested_then_default_then_first() {
        let pack = ProfileThresholdsPack::parse(&pack_doc()).unwrap();

        let requested = pack.resolve("commander", "casual");
        assert_eq!(requested.selected_profile_id, "casual");
        assert_eq!(requested.selection_source, ProfileSelectionSource::Profile);

        let fallback = pack.resolve("commander", "unheard_of");
        assert_eq!(fallback.selected_profile_id, "focused");
        assert_eq!(fallback.selection_source, ProfileSelectionSource::Default);

        let missing_format = pack.resolve("modern", "focused");
        assert_eq!(missing_format.selected_profile_id, "");
        assert_eq!(
            missing_format.selection_source,
            ProfileSelectionSource::Unavailable
        );
        assert!(missing_format.domains.is_none());
    }
}
