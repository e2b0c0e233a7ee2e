//! Sufficiency summary: six domain verdicts aggregated to one status.
//!
//! The readiness gate requires every upstream layer to be OK or WARN;
//! otherwise the whole summary SKIPs. Domain checks compare fixed metrics
//! against the resolved profile thresholds: a missing metric WARNs, a
//! threshold breach FAILs, and FAIL strictly wins over WARN at the
//! aggregate. A missing-metric WARN in one domain can never demote a FAIL
//! from another.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fixed::Fixed6;
use crate::layers::coherence::CoherencePayload;
use crate::layers::commander_reliability::CommanderReliabilityPayload;
use crate::layers::mulligan_model::MulliganModelPayload;
use crate::layers::probability_checkpoint::ProbabilityCheckpointPayload;
use crate::layers::probability_core::ProbabilityCorePayload;
use crate::layers::required_effects_coverage::RequiredEffectsCoveragePayload;
use crate::layers::requirement_detection::RequirementDetectionPayload;
use crate::layers::resilience::ResiliencePayload;
use crate::layers::stress_model_definition::StressModelDefinitionPayload;
use crate::layers::stress_transform::StressTransformPayload;
use crate::layers::substitution_engine::SubstitutionEnginePayload;
use crate::layers::weight_multiplier::WeightMultiplierPayload;
use crate::packs::profile_thresholds::{DomainThresholds, ResolvedThresholds};
use crate::status::{LayerStatus, SummaryStatus};

pub const SUFFICIENCY_SUMMARY_VERSION: &str = "sufficiency_summary_v1";

const VERSION_KEYS: [&str; 14] = [
    "engine_coherence_version",
    "mulligan_model_version",
    "substitution_engine_version",
    "weight_multiplier_engine_version",
    "probability_model_version",
    "probability_checkpoint_version",
    "stress_model_version",
    "stress_transform_version",
    "resilience_math_engine_version",
    "commander_reliability_model_version",
    "required_effects_version",
    "profile_thresholds_version",
    "calibration_snapshot_version",
    "sufficiency_summary_version",
];

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainVerdict {
    pub status: SummaryStatus,
    pub codes: Vec<String>,
}

impl DomainVerdict {
    fn all(status: SummaryStatus) -> DomainVerdict {
        DomainVerdict {
            status,
            codes: Vec::new(),
        }
    }
}

/// The six domains in their fixed evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainVerdicts {
    pub required_effects: DomainVerdict,
    pub baseline_prob: DomainVerdict,
    pub stress_prob: DomainVerdict,
    pub coherence: DomainVerdict,
    pub resilience: DomainVerdict,
    pub commander: DomainVerdict,
}

impl DomainVerdicts {
    fn uniform(status: SummaryStatus) -> DomainVerdicts {
        DomainVerdicts {
            required_effects: DomainVerdict::all(status),
            baseline_prob: DomainVerdict::all(status),
            stress_prob: DomainVerdict::all(status),
            coherence: DomainVerdict::all(status),
            resilience: DomainVerdict::all(status),
            commander: DomainVerdict::all(status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdsUsed {
    pub profile_thresholds_version: Option<String>,
    pub calibration_snapshot_version: Option<String>,
    pub format: String,
    pub requested_profile_id: String,
    pub selected_profile_id: String,
    pub selection_source: String,
    pub domains: Option<DomainThresholds>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SufficiencySummaryPayload {
    pub version: String,
    pub status: SummaryStatus,
    pub reason_code: Option<String>,
    pub codes: Vec<String>,
    pub failures: Vec<String>,
    pub warnings: Vec<String>,
    pub domain_verdicts: DomainVerdicts,
    pub thresholds_used: ThresholdsUsed,
    pub versions_used: BTreeMap<String, Option<String>>,
}

impl SufficiencySummaryPayload {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Everything the summary reads. All upstream payloads are frozen
/// snapshots; the summary never mutates them.
pub struct SufficiencyInputs<'a> {
    pub format: &'a str,
    pub profile_id: &'a str,
    pub thresholds: Option<&'a ResolvedThresholds>,
    pub requirement_detection: Option<&'a RequirementDetectionPayload>,
    pub coherence: Option<&'a CoherencePayload>,
    pub mulligan: Option<&'a MulliganModelPayload>,
    pub substitution: Option<&'a SubstitutionEnginePayload>,
    pub weight_multiplier: Option<&'a WeightMultiplierPayload>,
    pub probability_core: Option<&'a ProbabilityCorePayload>,
    pub probability_checkpoint: Option<&'a ProbabilityCheckpointPayload>,
    pub stress_definition: Option<&'a StressModelDefinitionPayload>,
    pub stress_transform: Option<&'a StressTransformPayload>,
    pub resilience: Option<&'a ResiliencePayload>,
    pub commander_reliability: Option<&'a CommanderReliabilityPayload>,
    pub required_effects_coverage: Option<&'a RequiredEffectsCoveragePayload>,
    pub pipeline_versions: &'a BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn thresholds_used(inputs: &SufficiencyInputs<'_>) -> ThresholdsUsed {
    match inputs.thresholds {
        Some(resolved) => ThresholdsUsed {
            profile_thresholds_version: crate::norm::nonempty_token(
                &resolved.profile_thresholds_version,
            ),
            calibration_snapshot_version: crate::norm::nonempty_token(
                &resolved.calibration_snapshot_version,
            ),
            format: if resolved.format.is_empty() {
                inputs.format.trim().to_string()
            } else {
                resolved.format.clone()
            },
            requested_profile_id: if resolved.requested_profile_id.is_empty() {
                inputs.profile_id.trim().to_string()
            } else {
                resolved.requested_profile_id.clone()
            },
            selected_profile_id: resolved.selected_profile_id.clone(),
            selection_source: resolved.selection_source.as_str().to_string(),
            domains: resolved.domains.clone(),
        },
        None => ThresholdsUsed {
            profile_thresholds_version: None,
            calibration_snapshot_version: None,
            format: inputs.format.trim().to_string(),
            requested_profile_id: inputs.profile_id.trim().to_string(),
            selected_profile_id: String::new(),
            selection_source: "unavailable".to_string(),
            domains: None,
        },
    }
}

fn versions_used(
    inputs: &SufficiencyInputs<'_>,
    thresholds: &ThresholdsUsed,
) -> BTreeMap<String, Option<String>> {
    let mut out: BTreeMap<String, Option<String>> = BTreeMap::new();
    for key in VERSION_KEYS {
        let value = inputs
            .pipeline_versions
            .get(key)
            .and_then(|v| crate::norm::nonempty_token(v));
        out.insert(key.to_string(), value);
    }
    if out
        .get("profile_thresholds_version")
        .map_or(true, Option::is_none)
    {
        out.insert(
            "profile_thresholds_version".to_string(),
            thresholds.profile_thresholds_version.clone(),
        );
    }
    if out
        .get("calibration_snapshot_version")
        .map_or(true, Option::is_none)
    {
        out.insert(
            "calibration_snapshot_version".to_string(),
            thresholds.calibration_snapshot_version.clone(),
        );
    }
    out
}

struct DomainAccumulator {
    fail_codes: BTreeSet<String>,
    warn_codes: BTreeSet<String>,
}

impl DomainAccumulator {
    fn new() -> DomainAccumulator {
        DomainAccumulator {
            fail_codes: BTreeSet::new(),
            warn_codes: BTreeSet::new(),
        }
    }

    fn fail(&mut self, code: &str) {
        self.fail_codes.insert(code.to_string());
    }

    fn warn(&mut self, code: &str) {
        self.warn_codes.insert(code.to_string());
    }

    fn finalize(
        self,
        failures: &mut BTreeSet<String>,
        warnings: &mut BTreeSet<String>,
    ) -> DomainVerdict {
        let status = if !self.fail_codes.is_empty() {
            SummaryStatus::Fail
        } else if !self.warn_codes.is_empty() {
            SummaryStatus::Warn
        } else {
            SummaryStatus::Pass
        };
        let codes: BTreeSet<String> = self
            .fail_codes
            .iter()
            .chain(self.warn_codes.iter())
            .cloned()
            .collect();
        failures.extend(self.fail_codes.iter().cloned());
        warnings.extend(self.warn_codes.iter().cloned());
        DomainVerdict {
            status,
            codes: codes.into_iter().collect(),
        }
    }
}

fn metric_check_min(
    accumulator: &mut DomainAccumulator,
    metric: Option<Fixed6>,
    minimum: Fixed6,
    unavailable_code: &str,
    below_code: &str,
) {
    match metric {
        None => accumulator.warn(unavailable_code),
        Some(value) if value < minimum => accumulator.fail(below_code),
        Some(_) => {}
    }
}

fn metric_check_max(
    accumulator: &mut DomainAccumulator,
    metric: Option<Fixed6>,
    maximum: Fixed6,
    unavailable_code: &str,
    above_code: &str,
) {
    match metric {
        None => accumulator.warn(unavailable_code),
        Some(value) if value > maximum => accumulator.fail(above_code),
        Some(_) => {}
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Aggregate the pipeline into the final PASS/WARN/FAIL/SKIP verdict.
pub fn run_sufficiency_summary(inputs: &SufficiencyInputs<'_>) -> SufficiencySummaryPayload {
    let thresholds = thresholds_used(inputs);
    let versions = versions_used(inputs, &thresholds);

    let skip = |reason: &str, codes: Vec<String>, thresholds: ThresholdsUsed| {
        SufficiencySummaryPayload {
            version: SUFFICIENCY_SUMMARY_VERSION.to_string(),
            status: SummaryStatus::Skip,
            reason_code: Some(reason.to_string()),
            codes,
            failures: Vec::new(),
            warnings: Vec::new(),
            domain_verdicts: DomainVerdicts::uniform(SummaryStatus::Skip),
            thresholds_used: thresholds,
            versions_used: versions.clone(),
        }
    };

    // Upstream readiness gate.
    let upstream: [(&str, Option<LayerStatus>); 11] = [
        (
            "engine_requirement_detection_v1",
            inputs.requirement_detection.map(|p| p.status),
        ),
        ("engine_coherence_v1", inputs.coherence.map(|p| p.status)),
        ("mulligan_model_v1", inputs.mulligan.map(|p| p.status)),
        ("substitution_engine_v1", inputs.substitution.map(|p| p.status)),
        (
            "weight_multiplier_engine_v1",
            inputs.weight_multiplier.map(|p| p.status),
        ),
        (
            "probability_math_core_v1",
            inputs.probability_core.map(|p| p.status),
        ),
        (
            "probability_checkpoint_layer_v1",
            inputs.probability_checkpoint.map(|p| p.status),
        ),
        (
            "stress_model_definition_v1",
            inputs.stress_definition.map(|p| p.status),
        ),
        (
            "stress_transform_engine_v2",
            inputs.stress_transform.map(|p| p.status),
        ),
        (
            "resilience_math_engine_v1",
            inputs.resilience.map(|p| p.status),
        ),
        (
            "commander_reliability_model_v1",
            inputs.commander_reliability.map(|p| p.status),
        ),
    ];

    let mut missing_upstream: BTreeSet<String> = BTreeSet::new();
    for (layer, status) in upstream {
        if !status.map(LayerStatus::is_ready).unwrap_or(false) {
            missing_upstream.insert(format!(
                "SUFFICIENCY_REQUIRED_UPSTREAM_UNAVAILABLE_{}",
                layer.to_uppercase()
            ));
        }
    }
    if !missing_upstream.is_empty() {
        return skip(
            "UPSTREAM_PHASE3_UNAVAILABLE",
            missing_upstream.into_iter().collect(),
            thresholds,
        );
    }
    // The gate above guarantees these payloads exist; the fallback keeps
    // the function total without a panic path.
    let (Some(commander), Some(resilience), Some(coherence_payload)) = (
        inputs.commander_reliability,
        inputs.resilience,
        inputs.coherence,
    ) else {
        return skip("UPSTREAM_PHASE3_UNAVAILABLE", Vec::new(), thresholds);
    };

    // Threshold availability gates.
    let Some(domains) = thresholds.domains.clone() else {
        return skip(
            "PROFILE_THRESHOLDS_UNAVAILABLE",
            vec!["SUFFICIENCY_PROFILE_THRESHOLDS_UNAVAILABLE".to_string()],
            thresholds,
        );
    };
    if thresholds.selected_profile_id.is_empty() {
        return skip(
            "PROFILE_THRESHOLDS_UNAVAILABLE",
            vec!["SUFFICIENCY_PROFILE_THRESHOLDS_UNAVAILABLE".to_string()],
            thresholds,
        );
    }
    if thresholds.calibration_snapshot_version.is_none() {
        return skip(
            "CALIBRATION_SNAPSHOT_UNAVAILABLE",
            vec!["SUFFICIENCY_CALIBRATION_SNAPSHOT_UNAVAILABLE".to_string()],
            thresholds,
        );
    }

    let mut failures: BTreeSet<String> = BTreeSet::new();
    let mut warnings: BTreeSet<String> = BTreeSet::new();

    // required_effects
    let mut required_effects = DomainAccumulator::new();
    match inputs.required_effects_coverage {
        None => required_effects.warn("SUFFICIENCY_REQUIRED_EFFECTS_PAYLOAD_UNAVAILABLE"),
        Some(coverage) => {
            if coverage.status == LayerStatus::Warn {
                required_effects.warn("SUFFICIENCY_REQUIRED_EFFECTS_SOURCE_WARN");
            }
            if coverage.missing.len() as u32 > domains.required_effects.max_missing {
                required_effects.fail("SUFFICIENCY_REQUIRED_EFFECTS_MISSING_EXCEEDS_MAX");
            }
            if coverage.unknowns.len() as u32 > domains.required_effects.max_unknowns {
                required_effects.warn("SUFFICIENCY_REQUIRED_EFFECTS_UNKNOWNS_EXCEED_MAX");
            }
        }
    }
    let required_effects_verdict = required_effects.finalize(&mut failures, &mut warnings);

    // baseline_prob
    let mut baseline = DomainAccumulator::new();
    if commander.status == LayerStatus::Warn {
        baseline.warn("SUFFICIENCY_BASELINE_SOURCE_WARN");
    }
    metric_check_min(
        &mut baseline,
        commander.metrics.cast_reliability_t3,
        domains.baseline_prob.cast_reliability_t3_min,
        "SUFFICIENCY_BASELINE_CAST_RELIABILITY_T3_UNAVAILABLE",
        "SUFFICIENCY_BASELINE_CAST_RELIABILITY_T3_BELOW_MIN",
    );
    metric_check_min(
        &mut baseline,
        commander.metrics.cast_reliability_t4,
        domains.baseline_prob.cast_reliability_t4_min,
        "SUFFICIENCY_BASELINE_CAST_RELIABILITY_T4_UNAVAILABLE",
        "SUFFICIENCY_BASELINE_CAST_RELIABILITY_T4_BELOW_MIN",
    );
    metric_check_min(
        &mut baseline,
        commander.metrics.cast_reliability_t6,
        domains.baseline_prob.cast_reliability_t6_min,
        "SUFFICIENCY_BASELINE_CAST_RELIABILITY_T6_UNAVAILABLE",
        "SUFFICIENCY_BASELINE_CAST_RELIABILITY_T6_BELOW_MIN",
    );
    let baseline_verdict = baseline.finalize(&mut failures, &mut warnings);

    // stress_prob
    let mut stress = DomainAccumulator::new();
    if resilience.status == LayerStatus::Warn {
        stress.warn("SUFFICIENCY_STRESS_SOURCE_WARN");
    }
    metric_check_min(
        &mut stress,
        resilience.metrics.engine_continuity_after_removal,
        domains.stress_prob.engine_continuity_after_removal_min,
        "SUFFICIENCY_STRESS_CONTINUITY_UNAVAILABLE",
        "SUFFICIENCY_STRESS_CONTINUITY_BELOW_MIN",
    );
    metric_check_min(
        &mut stress,
        resilience.metrics.rebuild_after_wipe,
        domains.stress_prob.rebuild_after_wipe_min,
        "SUFFICIENCY_STRESS_REBUILD_UNAVAILABLE",
        "SUFFICIENCY_STRESS_REBUILD_BELOW_MIN",
    );
    metric_check_max(
        &mut stress,
        resilience.metrics.graveyard_fragility_delta,
        domains.stress_prob.graveyard_fragility_delta_max,
        "SUFFICIENCY_STRESS_GRAVEYARD_FRAGILITY_UNAVAILABLE",
        "SUFFICIENCY_STRESS_GRAVEYARD_FRAGILITY_ABOVE_MAX",
    );
    let stress_verdict = stress.finalize(&mut failures, &mut warnings);

    // coherence
    let mut coherence = DomainAccumulator::new();
    if coherence_payload.status == LayerStatus::Warn {
        coherence.warn("SUFFICIENCY_COHERENCE_SOURCE_WARN");
    }
    metric_check_max(
        &mut coherence,
        Some(coherence_payload.summary.dead_slot_ratio),
        domains.coherence.dead_slot_ratio_max,
        "SUFFICIENCY_COHERENCE_DEAD_SLOT_RATIO_UNAVAILABLE",
        "SUFFICIENCY_COHERENCE_DEAD_SLOT_RATIO_ABOVE_MAX",
    );
    metric_check_min(
        &mut coherence,
        Some(coherence_payload.summary.overlap_score),
        domains.coherence.overlap_score_min,
        "SUFFICIENCY_COHERENCE_OVERLAP_SCORE_UNAVAILABLE",
        "SUFFICIENCY_COHERENCE_OVERLAP_SCORE_BELOW_MIN",
    );
    let coherence_verdict = coherence.finalize(&mut failures, &mut warnings);

    // resilience
    let mut resilience_domain = DomainAccumulator::new();
    if resilience.status == LayerStatus::Warn {
        resilience_domain.warn("SUFFICIENCY_RESILIENCE_SOURCE_WARN");
    }
    metric_check_max(
        &mut resilience_domain,
        resilience.metrics.commander_fragility_delta,
        domains.resilience.commander_fragility_delta_max,
        "SUFFICIENCY_RESILIENCE_COMMANDER_FRAGILITY_UNAVAILABLE",
        "SUFFICIENCY_RESILIENCE_COMMANDER_FRAGILITY_ABOVE_MAX",
    );
    let resilience_verdict = resilience_domain.finalize(&mut failures, &mut warnings);

    // commander
    let mut commander_domain = DomainAccumulator::new();
    if commander.status == LayerStatus::Warn {
        commander_domain.warn("SUFFICIENCY_COMMANDER_SOURCE_WARN");
    }
    let commander_dependent = commander
        .commander_dependent
        .as_deref()
        .unwrap_or("UNKNOWN");
    if commander_dependent != "LOW" {
        metric_check_min(
            &mut commander_domain,
            commander.metrics.protection_coverage_proxy,
            domains.commander.protection_coverage_proxy_min,
            "SUFFICIENCY_COMMANDER_PROTECTION_PROXY_UNAVAILABLE",
            "SUFFICIENCY_COMMANDER_PROTECTION_PROXY_BELOW_MIN",
        );
    }
    metric_check_max(
        &mut commander_domain,
        commander.metrics.commander_fragility_delta,
        domains.commander.commander_fragility_delta_max,
        "SUFFICIENCY_COMMANDER_FRAGILITY_DELTA_UNAVAILABLE",
        "SUFFICIENCY_COMMANDER_FRAGILITY_DELTA_ABOVE_MAX",
    );
    let commander_verdict = commander_domain.finalize(&mut failures, &mut warnings);

    // Aggregate: FAIL strictly wins over WARN.
    let status = if !failures.is_empty() {
        SummaryStatus::Fail
    } else if !warnings.is_empty() {
        SummaryStatus::Warn
    } else {
        SummaryStatus::Pass
    };

    let all_codes: BTreeSet<String> = failures.union(&warnings).cloned().collect();

    SufficiencySummaryPayload {
        version: SUFFICIENCY_SUMMARY_VERSION.to_string(),
        status,
        reason_code: None,
        codes: all_codes.into_iter().collect(),
        failures: failures.into_iter().collect(),
        warnings: warnings.into_iter().collect(),
        domain_verdicts: DomainVerdicts {
            required_effects: required_effects_verdict,
            baseline_prob: baseline_verdict,
            stress_prob: stress_verdict,
            coherence: coherence_verdict,
            resilience: resilience_verdict,
            commander: commander_verdict,
        },
        thresholds_used: thresholds,
        versions_used: versions,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::commander_reliability::CommanderReliabilityMetrics;
    use crate::layers::resilience::ResilienceMetrics;
    use crate::packs::profile_thresholds::{ProfileSelectionSource, ProfileThresholdsPack};
    use serde_json::json;

    fn resolved_thresholds() -> ResolvedThresholds {
        let pack = ProfileThresholdsPack::parse(&json!({
            "version": "profile_thresholds_v1",
            "calibration_snapshot_version": "calibration_snapshot_v1@2025-06",
            "format_defaults": {
                "commander": {
                    "default_profile_id": "focused",
                    "profiles": {
                        "focused": {
                            "domains": {
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
                            }
                        }
                    }
                }
            }
        }))
        .unwrap();
        pack.resolve("commander", "focused")
    }

    struct Fixture {
        thresholds: ResolvedThresholds,
        requirement_detection: RequirementDetectionPayload,
        coherence: CoherencePayload,
        mulligan: MulliganModelPayload,
        substitution: SubstitutionEnginePayload,
        weight_multiplier: WeightMultiplierPayload,
        probability_core: ProbabilityCorePayload,
        probability_checkpoint: ProbabilityCheckpointPayload,
        stress_definition: StressModelDefinitionPayload,
        stress_transform: StressTransformPayload,
        resilience: ResiliencePayload,
        commander_reliability: CommanderReliabilityPayload,
        required_effects_coverage: RequiredEffectsCoveragePayload,
        pipeline_versions: BTreeMap<String, String>,
    }

    fn ok_status_payload<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
        serde_json::from_value(value).unwrap()
    }

    fn fixture() -> Fixture {
        let coherence: CoherencePayload = ok_status_payload(json!({
            "version": "engine_coherence_v1",
            "status": "OK",
            "reason_code": null,
            "codes": [],
            "summary": {
                "playable_slots_total": 99,
                "non_dead_slots_total": 99,
                "dead_slots_total": 0,
                "dead_slot_ratio": 0.0,
                "primitive_concentration_index": 0.3,
                "overlap_score": 0.1
            },
            "dead_slots": [],
            "top_primitive_concentration": []
        }));

        let resilience = ResiliencePayload {
            version: "resilience_math_engine_v1".to_string(),
            status: LayerStatus::Ok,
            reason_code: None,
            codes: Vec::new(),
            format: "commander".to_string(),
            checkpoints: crate::CHECKPOINTS.to_vec(),
            commander_dependency: Some("LOW".to_string()),
            metrics: ResilienceMetrics {
                engine_continuity_after_removal: Some(Fixed6::from_micros(800_000)),
                rebuild_after_wipe: Some(Fixed6::from_micros(700_000)),
                graveyard_fragility_delta: Some(Fixed6::from_micros(100_000)),
                commander_fragility_delta: Some(Fixed6::ZERO),
            },
            bucket_metrics: Vec::new(),
        };

        let commander_reliability = CommanderReliabilityPayload {
            version: "commander_reliability_model_v1".to_string(),
            status: LayerStatus::Ok,
            reason_code: None,
            codes: Vec::new(),
            commander_dependent: Some("LOW".to_string()),
            checkpoint_mapping: [("t3", 9u32), ("t4", 10), ("t6", 12)]
                .iter()
                .map(|(turn, checkpoint)| (turn.to_string(), *checkpoint))
                .collect(),
            metrics: CommanderReliabilityMetrics {
                cast_reliability_t3: Some(Fixed6::from_micros(700_000)),
                cast_reliability_t4: Some(Fixed6::from_micros(800_000)),
                cast_reliability_t6: Some(Fixed6::from_micros(950_000)),
                protection_coverage_proxy: Some(Fixed6::from_micros(50_000)),
                commander_fragility_delta: Some(Fixed6::ZERO),
            },
            notes: Vec::new(),
        };

        let required_effects_coverage = RequiredEffectsCoveragePayload {
            version: "required_effects_coverage_v1".to_string(),
            status: LayerStatus::Ok,
            reason_code: None,
            codes: Vec::new(),
            requirements_version: "required_effects_v1".to_string(),
            coverage: Vec::new(),
            missing: Vec::new(),
            unknowns: Vec::new(),
        };

        Fixture {
            thresholds: resolved_thresholds(),
            requirement_detection: RequirementDetectionPayload {
                version: "engine_requirement_detection_v1".to_string(),
                status: LayerStatus::Warn,
                reason_code: None,
                codes: Vec::new(),
                unknowns: Vec::new(),
                engine_requirements_v1: Some(
                    crate::layers::requirement_detection::EngineRequirements {
                        flags: BTreeMap::new(),
                        commander_dependent:
                            crate::layers::requirement_detection::CommanderDependence::Low,
                    },
                ),
            },
            coherence,
            mulligan: ok_status_payload(json!({
                "version": "mulligan_model_v1",
                "status": "OK",
                "reason_code": null,
                "codes": [],
                "assumptions_version": "mulligan_assumptions_v1",
                "format": "commander",
                "default_policy": "NORMAL",
                "checkpoints": [7, 9, 10, 12],
                "policy_effective_n": []
            })),
            substitution: ok_status_payload(json!({
                "version": "substitution_engine_v1",
                "status": "OK",
                "reason_code": null,
                "codes": [],
                "substitutions_version": "bucket_substitutions_v1",
                "format": "commander",
                "buckets": []
            })),
            weight_multiplier: ok_status_payload(json!({
                "version": "weight_multiplier_engine_v1",
                "status": "OK",
                "reason_code": null,
                "codes": [],
                "weight_rules_version": "weight_rules_v1",
                "format": "commander",
                "multipliers_by_bucket": [],
                "applied_rules": []
            })),
            probability_core: ok_status_payload(json!({
                "version": "probability_math_core_v1",
                "status": "OK",
                "reason_code": null,
                "codes": [],
                "math_backend": "int_comb",
                "available_functions": ["comb", "hypergeom_p_ge_1", "hypergeom_p_ge_x"],
                "validated_buckets": 2
            })),
            probability_checkpoint: ok_status_payload(json!({
                "version": "probability_checkpoint_layer_v1",
                "status": "OK",
                "reason_code": null,
                "codes": [],
                "format": "commander",
                "deck_size_N": 99,
                "default_policy": "NORMAL",
                "checkpoints": [7, 9, 10, 12],
                "checkpoint_draws": [],
                "probabilities_by_bucket": []
            })),
            stress_definition: ok_status_payload(json!({
                "version": "stress_model_definition_v1",
                "status": "OK",
                "reason_code": null,
                "codes": [],
                "stress_models_version": "stress_models_v1",
                "format": "commander",
                "profile_id": "focused",
                "bracket_id": "B2",
                "request_override_model_id": null,
                "selected_model_id": "m",
                "selection_source": "default",
                "operators": []
            })),
            stress_transform: ok_status_payload(json!({
                "version": "stress_transform_engine_v2",
                "status": "OK",
                "reason_code": null,
                "codes": [],
                "format": "commander",
                "deck_size_N": 99,
                "selected_model_id": "m",
                "policy_version": "stress_operator_policy_v1",
                "operators_applied": [],
                "checkpoints": [7, 9, 10, 12],
                "checkpoint_draws": [],
                "stress_adjusted_effective_K": [],
                "stress_adjusted_probabilities_by_bucket": [],
                "operator_impacts": []
            })),
            resilience,
            commander_reliability,
            required_effects_coverage,
            pipeline_versions: BTreeMap::new(),
        }
    }

    fn inputs(fixture: &Fixture) -> SufficiencyInputs<'_> {
        SufficiencyInputs {
            format: "commander",
            profile_id: "focused",
            thresholds: Some(&fixture.thresholds),
            requirement_detection: Some(&fixture.requirement_detection),
            coherence: Some(&fixture.coherence),
            mulligan: Some(&fixture.mulligan),
            substitution: Some(&fixture.substitution),
            weight_multiplier: Some(&fixture.weight_multiplier),
            probability_core: Some(&fixture.probability_core),
            probability_checkpoint: Some(&fixture.probability_checkpoint),
            stress_definition: Some(&fixture.stress_definition),
            stress_transform: Some(&fixture.stress_transform),
            resilience: Some(&fixture.resilience),
            commander_reliability: Some(&fixture.commander_reliability),
            required_effects_coverage: Some(&fixture.required_effects_coverage),
            pipeline_versions: &fixture.pipeline_versions,
        }
    }

    #[test]
    fn all_domains_pass() {
        let fixture = fixture();
        let payload = run_sufficiency_summary(&inputs(&fixture));
        assert_eq!(payload.status, SummaryStatus::Pass);
        assert!(payload.failures.is_empty());
        assert!(payload.warnings.is_empty());
        assert_eq!(
            payload.domain_verdicts.baseline_prob.status,
            SummaryStatus::Pass
        );
    }

    #[test]
    fn missing_upstream_skips_everything() {
        let fixture = fixture();
        let mut i = inputs(&fixture);
        i.resilience = None;
        let payload = run_sufficiency_summary(&i);
        assert_eq!(payload.status, SummaryStatus::Skip);
        assert_eq!(
            payload.reason_code.as_deref(),
            Some("UPSTREAM_PHASE3_UNAVAILABLE")
        );
        assert_eq!(
            payload.codes,
            ["SUFFICIENCY_REQUIRED_UPSTREAM_UNAVAILABLE_RESILIENCE_MATH_ENGINE_V1"]
        );
        assert_eq!(
            payload.domain_verdicts.coherence.status,
            SummaryStatus::Skip
        );
    }

    #[test]
    fn error_upstream_also_skips() {
        let mut fixture = fixture();
        fixture.probability_core.status = LayerStatus::Error;
        let payload = run_sufficiency_summary(&inputs(&fixture));
        assert_eq!(payload.status, SummaryStatus::Skip);
    }

    #[test]
    fn missing_thresholds_skip() {
        let fixture = fixture();
        let mut i = inputs(&fixture);
        i.thresholds = None;
        let payload = run_sufficiency_summary(&i);
        assert_eq!(payload.status, SummaryStatus::Skip);
        assert_eq!(
            payload.reason_code.as_deref(),
            Some("PROFILE_THRESHOLDS_UNAVAILABLE")
        );
    }

    #[test]
    fn missing_calibration_version_skips() {
        let mut fixture = fixture();
        fixture.thresholds.calibration_snapshot_version = String::new();
        let payload = run_sufficiency_summary(&inputs(&fixture));
        assert_eq!(payload.status, SummaryStatus::Skip);
        assert_eq!(
            payload.reason_code.as_deref(),
            Some("CALIBRATION_SNAPSHOT_UNAVAILABLE")
        );
    }

    #[test]
    fn cast_reliability_below_min_fails_baseline() {
        let mut fixture = fixture();
        fixture.commander_reliability.metrics.cast_reliability_t3 =
            Some(Fixed6::from_micros(100_000));
        let payload = run_sufficiency_summary(&inputs(&fixture));
        assert_eq!(payload.status, SummaryStatus::Fail);
        assert_eq!(
            payload.domain_verdicts.baseline_prob.status,
            SummaryStatus::Fail
        );
        assert!(payload
            .failures
            .contains(&"SUFFICIENCY_BASELINE_CAST_RELIABILITY_T3_BELOW_MIN".to_string()));
    }

    #[test]
    fn warn_in_one_domain_does_not_mask_fail_elsewhere() {
        let mut fixture = fixture();
        // Baseline FAIL plus a missing stress metric WARN.
        fixture.commander_reliability.metrics.cast_reliability_t3 =
            Some(Fixed6::from_micros(100_000));
        fixture.resilience.metrics.engine_continuity_after_removal = None;
        let payload = run_sufficiency_summary(&inputs(&fixture));
        assert_eq!(payload.status, SummaryStatus::Fail);
        assert_eq!(
            payload.domain_verdicts.stress_prob.status,
            SummaryStatus::Warn
        );
        assert!(payload
            .warnings
            .contains(&"SUFFICIENCY_STRESS_CONTINUITY_UNAVAILABLE".to_string()));
    }

    #[test]
    fn protection_proxy_skipped_for_low_dependence() {
        let mut fixture = fixture();
        fixture.commander_reliability.metrics.protection_coverage_proxy = None;
        // LOW dependence: the missing proxy must not even WARN.
        let payload = run_sufficiency_summary(&inputs(&fixture));
        assert_eq!(
            payload.domain_verdicts.commander.status,
            SummaryStatus::Pass
        );

        fixture.commander_reliability.commander_dependent = Some("HIGH".to_string());
        let payload = run_sufficiency_summary(&inputs(&fixture));
        assert_eq!(
            payload.domain_verdicts.commander.status,
            SummaryStatus::Warn
        );
    }

    #[test]
    fn coherence_breaches_fail() {
        let mut fixture = fixture();
        fixture.coherence.summary.dead_slot_ratio = Fixed6::from_micros(100_000);
        fixture.coherence.summary.overlap_score = Fixed6::from_micros(1_000);
        let payload = run_sufficiency_summary(&inputs(&fixture));
        assert_eq!(payload.status, SummaryStatus::Fail);
        let codes = &payload.domain_verdicts.coherence.codes;
        assert!(codes.contains(&"SUFFICIENCY_COHERENCE_DEAD_SLOT_RATIO_ABOVE_MAX".to_string()));
        assert!(codes.contains(&"SUFFICIENCY_COHERENCE_OVERLAP_SCORE_BELOW_MIN".to_string()));
    }

    #[test]
    fn source_warn_statuses_surface_as_domain_warns() {
        let mut fixture = fixture();
        fixture.resilience.status = LayerStatus::Warn;
        let payload = run_sufficiency_summary(&inputs(&fixture));
        assert_eq!(payload.status, SummaryStatus::Warn);
        assert!(payload
            .warnings
            .contains(&"SUFFICIENCY_STRESS_SOURCE_WARN".to_string()));
        assert!(payload
            .warnings
            .contains(&"SUFFICIENCY_RESILIENCE_SOURCE_WARN".to_string()));
    }

    #[test]
    fn versions_used_carries_threshold_versions() {
        let fixture = fixture();
        let payload = run_sufficiency_summary(&inputs(&fixture));
        assert_eq!(
            payload.versions_used["profile_thresholds_version"].as_deref(),
            Some("profile_thresholds_v1")
        );
        assert_eq!(
            payload.versions_used["calibration_snapshot_version"].as_deref(),
            Some("calibration_snapshot_v1@2025-06")
        );
        assert_eq!(payload.versions_used.len(), VERSION_KEYS.len());
    }

    #[test]
    fn unknowns_over_max_warn_only() {
        let mut fixture = fixture();
        fixture.required_effects_coverage.status = LayerStatus::Warn;
        fixture.required_effects_coverage.unknowns = (0..3)
            .map(|i| crate::layers::required_effects_coverage::UnknownRow {
                code: "REQUIRED_PRIMITIVE_UNSUPPORTED".to_string(),
                message: format!("unsupported {i}"),
            })
            .collect();
        let payload = run_sufficiency_summary(&inputs(&fixture));
        assert_eq!(payload.status, SummaryStatus::Warn);
        assert_eq!(
            payload.domain_verdicts.required_effects.status,
            SummaryStatus::Warn
        );
        assert!(payload
            .warnings
            .contains(&"SUFFICIENCY_REQUIRED_EFFECTS_UNKNOWNS_EXCEED_MAX".to_string()));
    }
}
