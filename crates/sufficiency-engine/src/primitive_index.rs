//! Compiled per-slot primitive index.
//!
//! Produced upstream by the taxonomy compiler; read-only here. Construction
//! normalizes every identifier list (trimmed, deduplicated, sorted) so
//! layer logic can iterate deterministically without re-normalizing.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::norm::clean_sorted_unique;

/// Immutable primitive index over the playable deck slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimitiveIndex {
    /// Slot id to its sorted primitive set.
    primitives_by_slot: BTreeMap<String, Vec<String>>,
    /// Inverse mapping, primitive id to the sorted slots carrying it.
    slots_by_primitive: BTreeMap<String, Vec<String>>,
    /// Playable slot ids, sorted unique.
    playable_slot_ids: Vec<String>,
}

impl PrimitiveIndex {
    /// Build a normalized index from raw upstream mappings.
    pub fn new(
        primitives_by_slot: BTreeMap<String, Vec<String>>,
        playable_slot_ids: Vec<String>,
    ) -> PrimitiveIndex {
        let playable = clean_sorted_unique(&playable_slot_ids);

        let mut by_slot: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (slot_id, primitives) in &primitives_by_slot {
            let Some(slot_id) = crate::norm::nonempty_token(slot_id) else {
                continue;
            };
            by_slot.insert(slot_id, clean_sorted_unique(primitives));
        }

        let mut by_primitive: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (slot_id, primitives) in &by_slot {
            for primitive in primitives {
                by_primitive
                    .entry(primitive.clone())
                    .or_default()
                    .insert(slot_id.clone());
            }
        }

        PrimitiveIndex {
            primitives_by_slot: by_slot,
            slots_by_primitive: by_primitive
                .into_iter()
                .map(|(primitive, slots)| (primitive, slots.into_iter().collect()))
                .collect(),
            playable_slot_ids: playable,
        }
    }

    /// Sorted playable slot ids.
    pub fn playable_slot_ids(&self) -> &[String] {
        &self.playable_slot_ids
    }

    /// Sorted primitives on a slot (empty for unknown slots).
    pub fn primitives_for_slot(&self, slot_id: &str) -> &[String] {
        self.primitives_by_slot
            .get(slot_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Sorted slots carrying a primitive (empty for unknown primitives).
    pub fn slots_for_primitive(&self, primitive_id: &str) -> &[String] {
        self.slots_by_primitive
            .get(primitive_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether both mappings carry at least one entry.
    pub fn is_populated(&self) -> bool {
        !self.primitives_by_slot.is_empty() && !self.slots_by_primitive.is_empty()
    }

    /// Slot-to-primitives view restricted to playable slots.
    pub fn playable_slot_primitives(&self) -> BTreeMap<String, Vec<String>> {
        self.playable_slot_ids
            .iter()
            .map(|slot_id| (slot_id.clone(), self.primitives_for_slot(slot_id).to_vec()))
            .collect()
    }

    /// Count of playable slots carrying any of the given primitives.
    pub fn count_playable_slots_with_any(&self, primitives: &[String]) -> u32 {
        let wanted: BTreeSet<&String> = primitives.iter().collect();
        if wanted.is_empty() {
            return 0;
        }
        let mut count = 0;
        for slot_id in &self.playable_slot_ids {
            let slot_primitives = self.primitives_for_slot(slot_id);
            if slot_primitives.iter().any(|p| wanted.contains(p)) {
                count += 1;
            }
        }
        count
    }

    /// Count of playable slots carrying one specific primitive.
    pub fn count_playable_slots_with(&self, primitive_id: &str) -> u32 {
        let mut count = 0;
        for slot_id in &self.playable_slot_ids {
            if self
                .primitives_for_slot(slot_id)
                .iter()
                .any(|p| p == primitive_id)
            {
                count += 1;
            }
        }
        count
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> PrimitiveIndex {
        let mut by_slot = BTreeMap::new();
        by_slot.insert(
            "s2".to_string(),
            vec!["RAMP".to_string(), "RAMP".to_string(), " DRAW ".to_string()],
        );
        by_slot.insert("s1".to_string(), vec!["RAMP".to_string()]);
        by_slot.insert("s3".to_string(), vec![]);
        PrimitiveIndex::new(
            by_slot,
            vec!["s3".to_string(), "s1".to_string(), "s2".to_string(), "s1".to_string()],
        )
    }

    #[test]
    fn normalizes_on_construction() {
        let idx = index();
        assert_eq!(idx.playable_slot_ids(), ["s1", "s2", "s3"]);
        assert_eq!(idx.primitives_for_slot("s2"), ["DRAW", "RAMP"]);
        assert_eq!(idx.slots_for_primitive("RAMP"), ["s1", "s2"]);
    }

    #[test]
    fn counts_any_and_specific() {
        let idx = index();
        assert_eq!(idx.count_playable_slots_with_any(&["RAMP".to_string()]), 2);
        assert_eq!(
            idx.count_playable_slots_with_any(&["DRAW".to_string(), "RAMP".to_string()]),
            2
        );
        assert_eq!(idx.count_playable_slots_with("DRAW"), 1);
        assert_eq!(idx.count_playable_slots_with_any(&[]), 0);
    }

    #[test]
    fn unknown_ids_are_empty() {
        let idx = index();
        assert!(idx.primitives_for_slot("missing").is_empty());
        assert!(idx.slots_for_primitive("MISSING").is_empty());
    }
}
