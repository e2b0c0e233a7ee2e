//! Pipeline driver: run the layers in dependency order and assemble the
//! content-addressed build result.
//!
//! Single-threaded per run. Each layer reads frozen upstream payloads and
//! immutable packs; the only mutable value is the `BuildResult` being
//! assembled, exclusively owned here. The pipeline always completes and
//! always returns a full result; layer failures surface as SKIP/ERROR
//! payloads, never as panics or partial output.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::{canonical_json, sha256_hex, strip_hash_fields};
use crate::combos::{detect_two_card_combos, ComboDetection, TWO_CARD_COMBOS_MATCH_MAX};
use crate::guard::{assert_runtime_safe_mode, GuardError};
use crate::layers::coherence::{run_coherence, CoherencePayload, COHERENCE_VERSION};
use crate::layers::commander_reliability::{
    run_commander_reliability, CommanderReliabilityPayload, COMMANDER_RELIABILITY_VERSION,
};
use crate::layers::mulligan_model::{
    run_mulligan_model, MulliganModelPayload, MULLIGAN_MODEL_VERSION,
};
use crate::layers::probability_checkpoint::{
    run_probability_checkpoint, ProbabilityCheckpointPayload, PROBABILITY_CHECKPOINT_VERSION,
};
use crate::layers::probability_core::{
    run_probability_core, ProbabilityCorePayload, PROBABILITY_MATH_CORE_VERSION,
};
use crate::layers::required_effects_coverage::{
    run_required_effects_coverage, RequiredEffectsCoveragePayload,
    REQUIRED_EFFECTS_COVERAGE_VERSION,
};
use crate::layers::requirement_detection::{
    run_requirement_detection, RequirementDetectionPayload, REQUIREMENT_DETECTION_VERSION,
};
use crate::layers::resilience::{run_resilience, ResiliencePayload, RESILIENCE_MATH_VERSION};
use crate::layers::stress_model_definition::{
    run_stress_model_definition, StressModelDefinitionPayload, STRESS_MODEL_DEFINITION_VERSION,
};
use crate::layers::stress_transform::{
    run_stress_transform, StressTransformPayload, STRESS_TRANSFORM_VERSION,
};
use crate::layers::substitution_engine::{
    run_substitution_engine, SubstitutionEnginePayload, SUBSTITUTION_ENGINE_VERSION,
};
use crate::layers::sufficiency_summary::{
    run_sufficiency_summary, SufficiencyInputs, SufficiencySummaryPayload,
    SUFFICIENCY_SUMMARY_VERSION,
};
use crate::layers::weight_multiplier::{
    run_weight_multiplier, WeightMultiplierPayload, WEIGHT_MULTIPLIER_VERSION,
};
use crate::packs::store::PackStore;
use crate::primitive_index::PrimitiveIndex;
use crate::request::BuildRequest;
use crate::status::LayerStatus;
use crate::trace::BuildLogEntry;

/// Engine release pin, hashed into every build.
pub const ENGINE_VERSION: &str = "sufficiency_engine_v1";

/// Ruleset pin for the closed operator/verdict vocabularies.
pub const RULESET_VERSION: &str = "sufficiency_ruleset_v1";

// ---------------------------------------------------------------------------
// BuildResult
// ---------------------------------------------------------------------------

/// All layer payloads plus the panel flags and version pins.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildResultBody {
    pub available_panels_v1: BTreeMap<String, bool>,
    pub pipeline_versions: BTreeMap<String, String>,
    pub engine_requirement_detection_v1: RequirementDetectionPayload,
    pub engine_coherence_v1: CoherencePayload,
    pub mulligan_model_v1: MulliganModelPayload,
    pub substitution_engine_v1: SubstitutionEnginePayload,
    pub weight_multiplier_engine_v1: WeightMultiplierPayload,
    pub probability_math_core_v1: ProbabilityCorePayload,
    pub probability_checkpoint_layer_v1: ProbabilityCheckpointPayload,
    pub stress_model_definition_v1: StressModelDefinitionPayload,
    pub stress_transform_engine_v2: StressTransformPayload,
    pub resilience_math_engine_v1: ResiliencePayload,
    pub commander_reliability_model_v1: CommanderReliabilityPayload,
    pub required_effects_coverage_v1: RequiredEffectsCoveragePayload,
    pub sufficiency_summary_v1: SufficiencySummaryPayload,
    /// Local-only combo detection; `None` when no catalog pack is loaded.
    pub two_card_combos: Option<ComboDetection>,
}

/// The completed, content-addressed build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildResult {
    pub engine_version: String,
    pub ruleset_version: String,
    pub db_snapshot_id: String,
    pub profile_id: String,
    pub bracket_id: String,
    /// Request-level status: the pipeline always completes.
    pub status: String,
    pub build_hash_v1: String,
    pub graph_hash_v2: Option<String>,
    /// Unknown-primitive reports surfaced from requirement detection.
    pub unknowns: Vec<Value>,
    pub result: BuildResultBody,
}

impl BuildResult {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// One structured log row per layer, in pipeline order.
    pub fn log_entries(&self, trace_id: &str) -> Vec<BuildLogEntry> {
        fn entry(
            trace_id: &str,
            layer: &str,
            version: &str,
            status: LayerStatus,
            reason_code: Option<&String>,
            codes: &[String],
        ) -> BuildLogEntry {
            BuildLogEntry::new(
                trace_id,
                layer,
                version,
                status,
                reason_code.map(String::as_str),
                codes.len(),
            )
        }

        let body = &self.result;
        vec![
            entry(
                trace_id,
                "engine_requirement_detection_v1",
                &body.engine_requirement_detection_v1.version,
                body.engine_requirement_detection_v1.status,
                body.engine_requirement_detection_v1.reason_code.as_ref(),
                &body.engine_requirement_detection_v1.codes,
            ),
            entry(
                trace_id,
                "engine_coherence_v1",
                &body.engine_coherence_v1.version,
                body.engine_coherence_v1.status,
                body.engine_coherence_v1.reason_code.as_ref(),
                &body.engine_coherence_v1.codes,
            ),
            entry(
                trace_id,
                "mulligan_model_v1",
                &body.mulligan_model_v1.version,
                body.mulligan_model_v1.status,
                body.mulligan_model_v1.reason_code.as_ref(),
                &body.mulligan_model_v1.codes,
            ),
            entry(
                trace_id,
                "substitution_engine_v1",
                &body.substitution_engine_v1.version,
                body.substitution_engine_v1.status,
                body.substitution_engine_v1.reason_code.as_ref(),
                &body.substitution_engine_v1.codes,
            ),
            entry(
                trace_id,
                "weight_multiplier_engine_v1",
                &body.weight_multiplier_engine_v1.version,
                body.weight_multiplier_engine_v1.status,
                body.weight_multiplier_engine_v1.reason_code.as_ref(),
                &body.weight_multiplier_engine_v1.codes,
            ),
            entry(
                trace_id,
                "probability_math_core_v1",
                &body.probability_math_core_v1.version,
                body.probability_math_core_v1.status,
                body.probability_math_core_v1.reason_code.as_ref(),
                &body.probability_math_core_v1.codes,
            ),
            entry(
                trace_id,
                "probability_checkpoint_layer_v1",
                &body.probability_checkpoint_layer_v1.version,
                body.probability_checkpoint_layer_v1.status,
                body.probability_checkpoint_layer_v1.reason_code.as_ref(),
                &body.probability_checkpoint_layer_v1.codes,
            ),
            entry(
                trace_id,
                "stress_model_definition_v1",
                &body.stress_model_definition_v1.version,
                body.stress_model_definition_v1.status,
                body.stress_model_definition_v1.reason_code.as_ref(),
                &body.stress_model_definition_v1.codes,
            ),
            entry(
                trace_id,
                "stress_transform_engine_v2",
                &body.stress_transform_engine_v2.version,
                body.stress_transform_engine_v2.status,
                body.stress_transform_engine_v2.reason_code.as_ref(),
                &body.stress_transform_engine_v2.codes,
            ),
            entry(
                trace_id,
                "resilience_math_engine_v1",
                &body.resilience_math_engine_v1.version,
                body.resilience_math_engine_v1.status,
                body.resilience_math_engine_v1.reason_code.as_ref(),
                &body.resilience_math_engine_v1.codes,
            ),
            entry(
                trace_id,
                "commander_reliability_model_v1",
                &body.commander_reliability_model_v1.version,
                body.commander_reliability_model_v1.status,
                body.commander_reliability_model_v1.reason_code.as_ref(),
                &body.commander_reliability_model_v1.codes,
            ),
            entry(
                trace_id,
                "required_effects_coverage_v1",
                &body.required_effects_coverage_v1.version,
                body.required_effects_coverage_v1.status,
                body.required_effects_coverage_v1.reason_code.as_ref(),
                &body.required_effects_coverage_v1.codes,
            ),
        ]
    }
}

// ---------------------------------------------------------------------------
// Repro bundle
// ---------------------------------------------------------------------------

/// Version pins plus the build hash: enough to reproduce a build byte for
/// byte against the same snapshot and pack set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReproBundle {
    pub engine_version: String,
    pub ruleset_version: String,
    pub db_snapshot_id: String,
    pub profile_id: String,
    pub bracket_id: String,
    pub build_hash_v1: String,
    pub pipeline_versions: BTreeMap<String, String>,
}

impl ReproBundle {
    pub fn from_build(build: &BuildResult) -> ReproBundle {
        ReproBundle {
            engine_version: build.engine_version.clone(),
            ruleset_version: build.ruleset_version.clone(),
            db_snapshot_id: build.db_snapshot_id.clone(),
            profile_id: build.profile_id.clone(),
            bracket_id: build.bracket_id.clone(),
            build_hash_v1: build.build_hash_v1.clone(),
            pipeline_versions: build.result.pipeline_versions.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// run_build
// ---------------------------------------------------------------------------

fn pipeline_versions(packs: &PackStore) -> BTreeMap<String, String> {
    let mut versions: BTreeMap<String, String> = BTreeMap::new();
    versions.insert(
        "engine_requirement_detection_version".to_string(),
        REQUIREMENT_DETECTION_VERSION.to_string(),
    );
    versions.insert(
        "engine_coherence_version".to_string(),
        COHERENCE_VERSION.to_string(),
    );
    versions.insert(
        "mulligan_model_version".to_string(),
        MULLIGAN_MODEL_VERSION.to_string(),
    );
    versions.insert(
        "substitution_engine_version".to_string(),
        SUBSTITUTION_ENGINE_VERSION.to_string(),
    );
    versions.insert(
        "weight_multiplier_engine_version".to_string(),
        WEIGHT_MULTIPLIER_VERSION.to_string(),
    );
    versions.insert(
        "probability_model_version".to_string(),
        PROBABILITY_MATH_CORE_VERSION.to_string(),
    );
    versions.insert(
        "probability_checkpoint_version".to_string(),
        PROBABILITY_CHECKPOINT_VERSION.to_string(),
    );
    versions.insert(
        "stress_model_version".to_string(),
        STRESS_MODEL_DEFINITION_VERSION.to_string(),
    );
    versions.insert(
        "stress_transform_version".to_string(),
        STRESS_TRANSFORM_VERSION.to_string(),
    );
    versions.insert(
        "resilience_math_engine_version".to_string(),
        RESILIENCE_MATH_VERSION.to_string(),
    );
    versions.insert(
        "commander_reliability_model_version".to_string(),
        COMMANDER_RELIABILITY_VERSION.to_string(),
    );
    versions.insert(
        "required_effects_coverage_version".to_string(),
        REQUIRED_EFFECTS_COVERAGE_VERSION.to_string(),
    );
    versions.insert(
        "sufficiency_summary_version".to_string(),
        SUFFICIENCY_SUMMARY_VERSION.to_string(),
    );
    if let Some(required_effects) = &packs.required_effects {
        versions.insert(
            "required_effects_version".to_string(),
            required_effects.version.clone(),
        );
    }
    if let Some(thresholds) = &packs.profile_thresholds {
        versions.insert(
            "profile_thresholds_version".to_string(),
            thresholds.version.clone(),
        );
        versions.insert(
            "calibration_snapshot_version".to_string(),
            thresholds.calibration_snapshot_version.clone(),
        );
    }
    versions
}

/// Run the full sufficiency pipeline for one request.
///
/// The primitive index and deck card keys come from upstream compilation;
/// the packs were loaded once into an immutable store. Guard violations are
/// the only error path; everything after the guard always completes.
pub fn run_build(
    request: &BuildRequest,
    index: Option<&PrimitiveIndex>,
    deck_card_keys: &[String],
    packs: &PackStore,
) -> Result<BuildResult, GuardError> {
    assert_runtime_safe_mode(request)?;

    let commander_slot_id = request.commander_slot_id.as_deref();

    // Layer 1: requirement detection.
    let requirement_detection = run_requirement_detection(
        index,
        commander_slot_id,
        packs.dependency_signatures.as_ref(),
    );

    // Layer 2: coherence.
    let coherence = run_coherence(index);

    // Layer 3: mulligan model.
    let mulligan = run_mulligan_model(&request.format, packs.mulligan_assumptions.as_ref());

    // Layer 4: substitution engine.
    let substitution = run_substitution_engine(
        index,
        Some(&requirement_detection),
        &request.format,
        packs.bucket_substitutions.as_ref(),
    );

    // Layer 5: weight multipliers.
    let weight_multiplier = run_weight_multiplier(
        Some(&requirement_detection),
        Some(&substitution),
        &request.format,
        packs.weight_rules.as_ref(),
    );

    // Layer 6: probability math core.
    let probability_core = run_probability_core(Some(&substitution));

    // Layer 7: probability checkpoints.
    let probability_checkpoint =
        run_probability_checkpoint(&request.format, Some(&substitution), Some(&mulligan));

    // Layer 8: stress model definition.
    let stress_definition = run_stress_model_definition(
        &request.format,
        &request.profile_id,
        &request.bracket_id,
        request.request_override_model_id.as_deref(),
        packs.stress_models.as_ref(),
    );

    // Layer 9: stress transform.
    let stress_transform = run_stress_transform(
        Some(&substitution),
        Some(&probability_checkpoint),
        Some(&stress_definition),
        Some(&probability_core),
        packs.stress_operator_policy.as_ref(),
    );

    // Layer 10: resilience math.
    let resilience = run_resilience(
        Some(&probability_checkpoint),
        Some(&stress_transform),
        Some(&requirement_detection),
    );

    // Layer 11: commander reliability.
    let commander_reliability = run_commander_reliability(
        commander_slot_id,
        Some(&probability_checkpoint),
        Some(&stress_transform),
        Some(&requirement_detection),
        index,
    );

    // Layer 12: required-effects coverage.
    let required_effects_coverage = run_required_effects_coverage(
        index,
        &request.format,
        packs.required_effects.as_ref(),
    );

    // Layer 13: sufficiency summary.
    let versions = pipeline_versions(packs);
    let resolved_thresholds = packs
        .profile_thresholds
        .as_ref()
        .map(|pack| pack.resolve(&request.format, &request.profile_id));
    let sufficiency_summary = run_sufficiency_summary(&SufficiencyInputs {
        format: &request.format,
        profile_id: &request.profile_id,
        thresholds: resolved_thresholds.as_ref(),
        requirement_detection: Some(&requirement_detection),
        coherence: Some(&coherence),
        mulligan: Some(&mulligan),
        substitution: Some(&substitution),
        weight_multiplier: Some(&weight_multiplier),
        probability_core: Some(&probability_core),
        probability_checkpoint: Some(&probability_checkpoint),
        stress_definition: Some(&stress_definition),
        stress_transform: Some(&stress_transform),
        resilience: Some(&resilience),
        commander_reliability: Some(&commander_reliability),
        required_effects_coverage: Some(&required_effects_coverage),
        pipeline_versions: &versions,
    });

    // Auxiliary: local-only combo detection.
    let two_card_combos = packs
        .combo_catalog
        .as_ref()
        .map(|catalog| detect_two_card_combos(catalog, deck_card_keys, TWO_CARD_COMBOS_MATCH_MAX));

    let available_panels: BTreeMap<String, bool> = [
        ("has_primitive_index", index.is_some()),
        (
            "has_requirement_detection",
            requirement_detection.status.is_ready(),
        ),
        ("has_coherence", coherence.status.is_ready()),
        ("has_mulligan_model", mulligan.status.is_ready()),
        ("has_substitution_engine", substitution.status.is_ready()),
        (
            "has_weight_multipliers",
            weight_multiplier.status.is_ready(),
        ),
        (
            "has_probability_checkpoints",
            probability_checkpoint.status.is_ready(),
        ),
        ("has_stress_model", stress_definition.status.is_ready()),
        ("has_stress_transform", stress_transform.status.is_ready()),
        ("has_resilience", resilience.status.is_ready()),
        (
            "has_commander_reliability",
            commander_reliability.status.is_ready(),
        ),
        (
            "has_required_effects",
            required_effects_coverage.status.is_ready(),
        ),
        ("has_sufficiency_summary", true),
        ("has_two_card_combos", two_card_combos.is_some()),
    ]
    .into_iter()
    .map(|(panel, flag)| (panel.to_string(), flag))
    .collect();

    let unknowns: Vec<Value> = requirement_detection
        .unknowns
        .iter()
        .map(|report| serde_json::to_value(report).unwrap_or(Value::Null))
        .collect();

    let body = BuildResultBody {
        available_panels_v1: available_panels,
        pipeline_versions: versions,
        engine_requirement_detection_v1: requirement_detection,
        engine_coherence_v1: coherence,
        mulligan_model_v1: mulligan,
        substitution_engine_v1: substitution,
        weight_multiplier_engine_v1: weight_multiplier,
        probability_math_core_v1: probability_core,
        probability_checkpoint_layer_v1: probability_checkpoint,
        stress_model_definition_v1: stress_definition,
        stress_transform_engine_v2: stress_transform,
        resilience_math_engine_v1: resilience,
        commander_reliability_model_v1: commander_reliability,
        required_effects_coverage_v1: required_effects_coverage,
        sufficiency_summary_v1: sufficiency_summary,
        two_card_combos,
    };

    let build_hash_v1 = compute_build_hash(&body);

    Ok(BuildResult {
        engine_version: ENGINE_VERSION.to_string(),
        ruleset_version: RULESET_VERSION.to_string(),
        db_snapshot_id: request.db_snapshot_id.clone(),
        profile_id: request.profile_id.clone(),
        bracket_id: request.bracket_id.clone(),
        status: "ok".to_string(),
        build_hash_v1,
        graph_hash_v2: None,
        unknowns,
        result: body,
    })
}

/// SHA-256 over the canonical serialization of the layer payloads plus the
/// version pins, with stored hash fields stripped first.
fn compute_build_hash(body: &BuildResultBody) -> String {
    let document = serde_json::to_value(body).unwrap_or(Value::Null);
    let stripped = strip_hash_fields(&document);
    sha256_hex(&canonical_json(&stripped))
}

// ===========================================================================
// Tests
// ===========================================================================
