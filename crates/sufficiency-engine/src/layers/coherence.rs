//! Deck coherence: dead slots, primitive concentration, pairwise overlap.
//!
//! Works purely on the normalized slot/primitive sets; graph structure
//! never influences the overlap score. All pair iteration follows the
//! sorted playable slot order, so accumulation is reproducible.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fixed::Fixed6;
use crate::primitive_index::PrimitiveIndex;
use crate::status::LayerStatus;

pub const COHERENCE_VERSION: &str = "engine_coherence_v1";

/// Concentration table cap.
const TOP_PRIMITIVES_LIMIT: usize = 8;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoherenceSummary {
    pub playable_slots_total: u64,
    pub non_dead_slots_total: u64,
    pub dead_slots_total: u64,
    pub dead_slot_ratio: Fixed6,
    pub primitive_concentration_index: Fixed6,
    pub overlap_score: Fixed6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadSlotRow {
    pub slot_id: String,
    pub primitive_count: u64,
    pub primitives: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcentrationRow {
    pub primitive: String,
    pub slots_with_primitive: u64,
    pub share: Fixed6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoherencePayload {
    pub version: String,
    pub status: LayerStatus,
    pub reason_code: Option<String>,
    pub codes: Vec<String>,
    pub summary: CoherenceSummary,
    pub dead_slots: Vec<DeadSlotRow>,
    pub top_primitive_concentration: Vec<ConcentrationRow>,
}

impl CoherencePayload {
    fn skip(reason_code: &str) -> CoherencePayload {
        CoherencePayload {
            version: COHERENCE_VERSION.to_string(),
            status: LayerStatus::Skip,
            reason_code: Some(reason_code.to_string()),
            codes: Vec::new(),
            summary: CoherenceSummary {
                playable_slots_total: 0,
                non_dead_slots_total: 0,
                dead_slots_total: 0,
                dead_slot_ratio: Fixed6::ZERO,
                primitive_concentration_index: Fixed6::ZERO,
                overlap_score: Fixed6::ZERO,
            },
            dead_slots: Vec::new(),
            top_primitive_concentration: Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Compute coherence metrics over the playable slots.
pub fn run_coherence(index: Option<&PrimitiveIndex>) -> CoherencePayload {
    let Some(index) = index else {
        return CoherencePayload::skip("PRIMITIVE_INDEX_UNAVAILABLE");
    };

    let playable = index.playable_slot_ids();
    let mut dead_slots = Vec::new();
    let mut non_dead_slot_ids: Vec<&String> = Vec::new();
    for slot_id in playable {
        if index.primitives_for_slot(slot_id).is_empty() {
            dead_slots.push(DeadSlotRow {
                slot_id: slot_id.clone(),
                primitive_count: 0,
                primitives: Vec::new(),
            });
        } else {
            non_dead_slot_ids.push(slot_id);
        }
    }

    // Coverage per primitive across non-dead slots.
    let mut coverage: BTreeMap<&String, u64> = BTreeMap::new();
    for slot_id in &non_dead_slot_ids {
        for primitive in index.primitives_for_slot(slot_id) {
            *coverage.entry(primitive).or_insert(0) += 1;
        }
    }

    let non_dead_total = non_dead_slot_ids.len() as u64;
    let mut top_primitive_concentration: Vec<ConcentrationRow> = Vec::new();
    if non_dead_total > 0 {
        top_primitive_concentration = coverage
            .iter()
            .map(|(primitive, slots_with_primitive)| ConcentrationRow {
                primitive: (*primitive).clone(),
                slots_with_primitive: *slots_with_primitive,
                share: Fixed6::from_ratio_u128(
                    u128::from(*slots_with_primitive),
                    u128::from(non_dead_total),
                ),
            })
            .collect();
        // Share descending, then primitive ascending; BTreeMap iteration
        // already yields primitive-ascending rows, so the sort is stable
        // on the tie-break.
        top_primitive_concentration.sort_by(|a, b| b.share.cmp(&a.share));
        top_primitive_concentration.truncate(TOP_PRIMITIVES_LIMIT);
    }

    let primitive_concentration_index = top_primitive_concentration
        .first()
        .map(|row| row.share)
        .unwrap_or(Fixed6::ZERO);

    // Pairwise Jaccard over non-dead slots. Each pair score is quantized,
    // then the mean is taken exactly.
    let mut pair_scores: Vec<Fixed6> = Vec::new();
    for left_index in 0..non_dead_slot_ids.len() {
        for right_index in (left_index + 1)..non_dead_slot_ids.len() {
            let left = index.primitives_for_slot(non_dead_slot_ids[left_index]);
            let right = index.primitives_for_slot(non_dead_slot_ids[right_index]);
            let shared = left.iter().filter(|p| right.contains(p)).count() as u128;
            let union = (left.len() + right.len()) as u128 - shared;
            if union == 0 {
                pair_scores.push(Fixed6::ZERO);
            } else {
                pair_scores.push(Fixed6::from_ratio_u128(shared, union));
            }
        }
    }
    let overlap_score = Fixed6::mean(&pair_scores)
        .unwrap_or(Fixed6::ZERO)
        .clamp_unit();

    let playable_total = playable.len() as u64;
    let dead_total = dead_slots.len() as u64;
    let dead_slot_ratio = if playable_total > 0 {
        Fixed6::from_ratio_u128(u128::from(dead_total), u128::from(playable_total))
    } else {
        Fixed6::ZERO
    };

    let mut codes = Vec::new();
    if dead_total > 0 {
        codes.push("DEAD_SLOTS_PRESENT".to_string());
    }

    CoherencePayload {
        version: COHERENCE_VERSION.to_string(),
        status: if codes.is_empty() {
            LayerStatus::Ok
        } else {
            LayerStatus::Warn
        },
        reason_code: None,
        codes,
        summary: CoherenceSummary {
            playable_slots_total: playable_total,
            non_dead_slots_total: non_dead_total,
            dead_slots_total: dead_total,
            dead_slot_ratio,
            primitive_concentration_index,
            overlap_score,
        },
        dead_slots,
        top_primitive_concentration,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn missing_index_skips() {
        let payload = run_coherence(None);
        assert_eq!(payload.status, LayerStatus::Skip);
        assert_eq!(
            payload.reason_code.as_deref(),
            Some("PRIMITIVE_INDEX_UNAVAILABLE")
        );
    }

    #[test]
    fn uniform_deck_concentration_and_overlap_are_one() {
        let slots: Vec<(String, Vec<String>)> = (0..99)
            .map(|i| (format!("s{i:02}"), vec!["BASIC_LAND".to_string()]))
            .collect();
        let by_slot: BTreeMap<String, Vec<String>> = slots.iter().cloned().collect();
        let playable = slots.iter().map(|(slot, _)| slot.clone()).collect();
        let index = PrimitiveIndex::new(by_slot, playable);

        let payload = run_coherence(Some(&index));
        assert_eq!(payload.status, LayerStatus::Ok);
        assert_eq!(payload.summary.playable_slots_total, 99);
        assert_eq!(payload.summary.primitive_concentration_index, Fixed6::ONE);
        assert_eq!(payload.summary.overlap_score, Fixed6::ONE);
        assert_eq!(payload.summary.dead_slot_ratio, Fixed6::ZERO);
    }

    #[test]
    fn dead_slots_warn_and_are_sorted() {
        let index = index_with(&[
            ("s3", &[]),
            ("s1", &["RAMP"]),
            ("s2", &[]),
        ]);
        let payload = run_coherence(Some(&index));
        assert_eq!(payload.status, LayerStatus::Warn);
        assert_eq!(payload.codes, ["DEAD_SLOTS_PRESENT"]);
        let ids: Vec<&str> = payload
            .dead_slots
            .iter()
            .map(|row| row.slot_id.as_str())
            .collect();
        assert_eq!(ids, ["s2", "s3"]);
        assert_eq!(payload.summary.dead_slot_ratio.to_string(), "0.666667");
    }

    #[test]
    fn overlap_zero_for_fewer_than_two_live_slots() {
        let payload = run_coherence(Some(&index_with(&[("s1", &["RAMP"]), ("s2", &[])])));
        assert_eq!(payload.summary.overlap_score, Fixed6::ZERO);

        let empty = run_coherence(Some(&index_with(&[("s1", &[]), ("s2", &[])])));
        assert_eq!(empty.summary.primitive_concentration_index, Fixed6::ZERO);
        assert_eq!(empty.summary.overlap_score, Fixed6::ZERO);
    }

    #[test]
    fn jaccard_mean_exact() {
        // Pair scores: (s1,s2) share RAMP of union {RAMP, DRAW} = 0.5;
        // (s1,s3) = 0; (s2,s3) share DRAW of union {RAMP, DRAW} = 0.5.
        let index = index_with(&[
            ("s1", &["RAMP"]),
            ("s2", &["RAMP", "DRAW"]),
            ("s3", &["DRAW"]),
        ]);
        let payload = run_coherence(Some(&index));
        assert_eq!(payload.summary.overlap_score.to_string(), "0.333333");
    }

    #[test]
    fn concentration_table_caps_at_eight_share_desc_primitive_asc() {
        let slots: Vec<(String, Vec<String>)> = (0..10)
            .map(|i| {
                let mut primitives = vec![format!("P{i:02}")];
                primitives.push("COMMON".to_string());
                (format!("s{i:02}"), primitives)
            })
            .collect();
        let by_slot: BTreeMap<String, Vec<String>> = slots.iter().cloned().collect();
        let playable = slots.iter().map(|(slot, _)| slot.clone()).collect();
        let payload = run_coherence(Some(&PrimitiveIndex::new(by_slot, playable)));

        assert_eq!(payload.top_primitive_concentration.len(), 8);
        assert_eq!(payload.top_primitive_concentration[0].primitive, "COMMON");
        // Remaining rows tie at share 0.1: primitive ascending.
        assert_eq!(payload.top_primitive_concentration[1].primitive, "P00");
        assert_eq!(payload.top_primitive_concentration[7].primitive, "P06");
    }
}
