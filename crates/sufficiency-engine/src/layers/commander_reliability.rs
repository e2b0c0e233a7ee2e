//! Commander reliability: cast-reliability proxies and protection coverage.
//!
//! Cast metrics source the RAMP bucket only, through the fixed turn to
//! checkpoint mapping t3->9, t4->10, t6->12. No mana-curve inference, no
//! text parsing. The protection proxy counts playable non-commander slots
//! carrying a protection primitive.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fixed::Fixed6;
use crate::layers::probability_checkpoint::ProbabilityCheckpointPayload;
use crate::layers::requirement_detection::{CommanderDependence, RequirementDetectionPayload};
use crate::layers::stress_transform::StressTransformPayload;
use crate::norm::sorted_codes;
use crate::primitive_index::PrimitiveIndex;
use crate::status::LayerStatus;

pub const COMMANDER_RELIABILITY_VERSION: &str = "commander_reliability_model_v1";

/// Fixed turn-to-checkpoint mapping.
pub const CHECKPOINT_BY_TURN: [(&str, u32); 3] = [("t3", 9), ("t4", 10), ("t6", 12)];

const RAMP_BUCKET: &str = "RAMP";
const PROTECTION_PRIMITIVES: [&str; 2] = ["HEXPROOF_PROTECTION", "INDESTRUCTIBLE_PROTECTION"];

const ERROR_CODES: [&str; 2] = [
    "COMMANDER_RELIABILITY_CHECKPOINT_INVALID",
    "COMMANDER_RELIABILITY_PROBABILITY_INVALID",
];

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommanderReliabilityMetrics {
    pub cast_reliability_t3: Option<Fixed6>,
    pub cast_reliability_t4: Option<Fixed6>,
    pub cast_reliability_t6: Option<Fixed6>,
    pub protection_coverage_proxy: Option<Fixed6>,
    pub commander_fragility_delta: Option<Fixed6>,
}

impl CommanderReliabilityMetrics {
    fn unavailable() -> CommanderReliabilityMetrics {
        CommanderReliabilityMetrics {
            cast_reliability_t3: None,
            cast_reliability_t4: None,
            cast_reliability_t6: None,
            protection_coverage_proxy: None,
            commander_fragility_delta: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommanderReliabilityPayload {
    pub version: String,
    pub status: LayerStatus,
    pub reason_code: Option<String>,
    pub codes: Vec<String>,
    pub commander_dependent: Option<String>,
    pub checkpoint_mapping: BTreeMap<String, u32>,
    pub metrics: CommanderReliabilityMetrics,
    pub notes: Vec<String>,
}

impl CommanderReliabilityPayload {
    fn skip(reason_code: &str, commander_dependent: Option<String>) -> CommanderReliabilityPayload {
        CommanderReliabilityPayload {
            version: COMMANDER_RELIABILITY_VERSION.to_string(),
            status: LayerStatus::Skip,
            reason_code: Some(reason_code.to_string()),
            codes: Vec::new(),
            commander_dependent,
            checkpoint_mapping: checkpoint_mapping(),
            metrics: CommanderReliabilityMetrics::unavailable(),
            notes: Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn checkpoint_mapping() -> BTreeMap<String, u32> {
    CHECKPOINT_BY_TURN
        .iter()
        .map(|(turn, checkpoint)| (turn.to_string(), *checkpoint))
        .collect()
}

// ---------------------------------------------------------------------------
// RAMP extraction
// ---------------------------------------------------------------------------

fn ramp_probabilities<'a, I>(rows: I, codes: &mut BTreeSet<String>) -> Option<BTreeMap<u32, Fixed6>>
where
    I: Iterator<Item = (&'a str, Vec<(u32, Fixed6)>)>,
{
    let mut ramp_row: Option<Vec<(u32, Fixed6)>> = None;
    for (bucket, probabilities) in rows {
        if bucket == RAMP_BUCKET {
            ramp_row = Some(probabilities);
            break;
        }
    }
    let probabilities = ramp_row?;

    let target_checkpoints: Vec<u32> = CHECKPOINT_BY_TURN
        .iter()
        .map(|(_, checkpoint)| *checkpoint)
        .collect();
    let mut by_checkpoint: BTreeMap<u32, Fixed6> = BTreeMap::new();
    for (checkpoint, probability) in probabilities {
        if !target_checkpoints.contains(&checkpoint) {
            continue;
        }
        if by_checkpoint.contains_key(&checkpoint) {
            codes.insert("COMMANDER_RELIABILITY_CHECKPOINT_INVALID".to_string());
            continue;
        }
        by_checkpoint.insert(checkpoint, probability.clamp_unit());
    }

    if target_checkpoints
        .iter()
        .any(|checkpoint| !by_checkpoint.contains_key(checkpoint))
    {
        codes.insert("COMMANDER_RELIABILITY_CHECKPOINT_INVALID".to_string());
        return None;
    }
    Some(by_checkpoint)
}

// ---------------------------------------------------------------------------
// Protection coverage
// ---------------------------------------------------------------------------

fn protection_coverage_proxy(
    commander_slot_id: &str,
    index: Option<&PrimitiveIndex>,
) -> Option<Fixed6> {
    let index = index?;
    let eligible: Vec<&String> = index
        .playable_slot_ids()
        .iter()
        .filter(|slot_id| slot_id.as_str() != commander_slot_id)
        .collect();
    if eligible.is_empty() {
        return None;
    }

    let mut protected: u32 = 0;
    for slot_id in &eligible {
        let primitives = index.primitives_for_slot(slot_id);
        if PROTECTION_PRIMITIVES
            .iter()
            .any(|protection| primitives.iter().any(|p| p == protection))
        {
            protected += 1;
        }
    }

    Some(Fixed6::from_ratio_u128(u128::from(protected), eligible.len() as u128).clamp_unit())
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Derive commander reliability metrics.
pub fn run_commander_reliability(
    commander_slot_id: Option<&str>,
    checkpoint: Option<&ProbabilityCheckpointPayload>,
    transform: Option<&StressTransformPayload>,
    requirements: Option<&RequirementDetectionPayload>,
    index: Option<&PrimitiveIndex>,
) -> CommanderReliabilityPayload {
    let commander_dependent = requirements
        .and_then(|payload| payload.engine_requirements_v1.as_ref())
        .map(|requirements| requirements.commander_dependent);
    let commander_dependent_token =
        commander_dependent.map(|class| class.as_str().to_string());

    let Some(commander_slot) = commander_slot_id
        .map(str::trim)
        .filter(|token| !token.is_empty())
    else {
        return CommanderReliabilityPayload::skip(
            "COMMANDER_SLOT_UNAVAILABLE",
            commander_dependent_token,
        );
    };

    let Some(checkpoint) = checkpoint
        .filter(|payload| payload.status.is_ready() && !payload.probabilities_by_bucket.is_empty())
    else {
        return CommanderReliabilityPayload::skip(
            "PROBABILITY_CHECKPOINT_UNAVAILABLE",
            commander_dependent_token,
        );
    };

    let Some(transform) = transform.filter(|payload| {
        payload.status.is_ready() && !payload.stress_adjusted_probabilities_by_bucket.is_empty()
    }) else {
        return CommanderReliabilityPayload::skip(
            "STRESS_TRANSFORM_UNAVAILABLE",
            commander_dependent_token,
        );
    };

    let mut codes: BTreeSet<String> = BTreeSet::new();
    let mut notes: BTreeSet<String> = BTreeSet::new();
    let mut metrics = CommanderReliabilityMetrics::unavailable();

    let baseline_ramp = ramp_probabilities(
        checkpoint.probabilities_by_bucket.iter().map(|row| {
            (
                row.bucket.as_str(),
                row.probabilities_by_checkpoint
                    .iter()
                    .map(|p| (p.checkpoint, p.p_ge_1))
                    .collect(),
            )
        }),
        &mut codes,
    );
    let stress_ramp = ramp_probabilities(
        transform
            .stress_adjusted_probabilities_by_bucket
            .iter()
            .map(|row| {
                (
                    row.bucket.as_str(),
                    row.probabilities_by_checkpoint
                        .iter()
                        .map(|p| (p.checkpoint, p.p_ge_1))
                        .collect(),
                )
            }),
        &mut codes,
    );

    match &baseline_ramp {
        Some(ramp) => {
            metrics.cast_reliability_t3 = Some(ramp[&9]);
            metrics.cast_reliability_t4 = Some(ramp[&10]);
            metrics.cast_reliability_t6 = Some(ramp[&12]);
        }
        None => {
            codes.insert("COMMANDER_RELIABILITY_RAMP_BUCKET_UNAVAILABLE".to_string());
            notes.insert(
                "RAMP bucket probabilities unavailable in baseline checkpoint payload.".to_string(),
            );
        }
    }

    match protection_coverage_proxy(commander_slot, index) {
        Some(proxy) => metrics.protection_coverage_proxy = Some(proxy),
        None => {
            codes.insert("COMMANDER_RELIABILITY_PROTECTION_PROXY_UNAVAILABLE".to_string());
            notes.insert(
                "Protection coverage proxy unavailable from primitive index/playable slot inputs."
                    .to_string(),
            );
        }
    }

    if commander_dependent == Some(CommanderDependence::Low) {
        metrics.commander_fragility_delta = Some(Fixed6::ZERO);
    } else if let (Some(baseline), Some(stress)) = (&baseline_ramp, &stress_ramp) {
        let baseline_values: Vec<Fixed6> = baseline.values().copied().collect();
        let stress_values: Vec<Fixed6> = stress.values().copied().collect();
        let baseline_mean = Fixed6::mean(&baseline_values).unwrap_or(Fixed6::ZERO);
        let stress_mean = Fixed6::mean(&stress_values).unwrap_or(Fixed6::ZERO);
        metrics.commander_fragility_delta =
            Some(baseline_mean.delta_nonnegative_unit(stress_mean));
    } else {
        codes.insert("COMMANDER_RELIABILITY_FRAGILITY_UNAVAILABLE".to_string());
        notes.insert(
            "Commander fragility delta unavailable because RAMP bucket probabilities were missing."
                .to_string(),
        );
    }

    if commander_dependent == Some(CommanderDependence::High)
        && metrics.protection_coverage_proxy.is_none()
    {
        notes.insert(
            "Commander dependency is HIGH while protection coverage proxy is unavailable."
                .to_string(),
        );
    }

    let codes_sorted = sorted_codes(&codes);
    let status = if codes_sorted.iter().any(|c| ERROR_CODES.contains(&c.as_str())) {
        LayerStatus::Error
    } else if codes_sorted.is_empty() {
        LayerStatus::Ok
    } else {
        LayerStatus::Warn
    };

    CommanderReliabilityPayload {
        version: COMMANDER_RELIABILITY_VERSION.to_string(),
        status,
        reason_code: None,
        codes: codes_sorted,
        commander_dependent: commander_dependent_token,
        checkpoint_mapping: checkpoint_mapping(),
        metrics,
        notes: notes.into_iter().collect(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
