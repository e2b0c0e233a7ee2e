//! Two-card combo packs and the local-only detector.
//!
//! `two_card_combos_v2` is the primary catalog; the legacy v1 pack is a
//! fallback used only when v2 is missing, never on a v2 parse failure.
//! Detection is strictly local set membership over canonical card keys;
//! anything that fetches remote combo data lives outside the runtime
//! boundary.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::norm::{canonical_card_key, clean_sorted_unique};
use crate::packs::{read_pack_json, require_exact_version, require_object, PackError};

pub const SPELLBOOK_VARIANTS_VERSION: &str = "commander_spellbook_variants_v1";
pub const TWO_CARD_COMBOS_V2_VERSION: &str = "two_card_combos_v2";
pub const TWO_CARD_COMBOS_V1_VERSION: &str = "two_card_combos_v1";

const SPELLBOOK_PACK: &str = "COMMANDER_SPELLBOOK_VARIANTS_V1";
const COMBOS_V2_PACK: &str = "TWO_CARD_COMBOS_V2";
const COMBOS_V1_PACK: &str = "TWO_CARD_COMBOS_V1";

/// Detector match cap.
pub const TWO_CARD_COMBOS_MATCH_MAX: usize = 25;

// ---------------------------------------------------------------------------
// Spellbook variants
// ---------------------------------------------------------------------------

/// One spellbook variant: an id and its canonical card keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellbookVariant {
    pub variant_id: String,
    /// Canonical lowercase card keys, sorted unique.
    pub cards: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellbookVariantsPack {
    pub version: String,
    pub variants: Vec<SpellbookVariant>,
}

impl SpellbookVariantsPack {
    pub fn parse(document: &Value) -> Result<SpellbookVariantsPack, PackError> {
        require_object(SPELLBOOK_PACK, document, "root")?;
        let version = require_exact_version(SPELLBOOK_PACK, document, SPELLBOOK_VARIANTS_VERSION)?;

        let variants_raw = document
            .get("variants")
            .and_then(Value::as_array)
            .ok_or_else(|| PackError::invalid(SPELLBOOK_PACK, "variants must be a list"))?;

        let mut variants = Vec::with_capacity(variants_raw.len());
        let mut seen_ids: BTreeSet<String> = BTreeSet::new();
        for (index, row) in variants_raw.iter().enumerate() {
            let variant_id = row
                .get("variant_id")
                .and_then(Value::as_str)
                .and_then(crate::norm::nonempty_token)
                .ok_or_else(|| {
                    PackError::invalid(
                        SPELLBOOK_PACK,
                        &format!("variants[{index}].variant_id must be a non-empty string"),
                    )
                })?;
            if !seen_ids.insert(variant_id.clone()) {
                return Err(PackError::invalid(
                    SPELLBOOK_PACK,
                    &format!("duplicate variant id '{variant_id}'"),
                ));
            }

            let cards_raw = row.get("cards").and_then(Value::as_array).ok_or_else(|| {
                PackError::invalid(SPELLBOOK_PACK, &format!("variants[{index}].cards must be a list"))
            })?;
            let cards: Vec<String> = cards_raw
                .iter()
                .filter_map(Value::as_str)
                .filter_map(canonical_card_key)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if cards.is_empty() {
                return Err(PackError::invalid(
                    SPELLBOOK_PACK,
                    &format!("variants[{index}].cards must include at least one card"),
                ));
            }

            variants.push(SpellbookVariant { variant_id, cards });
        }

        variants.sort_by(|a, b| a.variant_id.cmp(&b.variant_id));
        Ok(SpellbookVariantsPack { version, variants })
    }

    pub fn load(path: &Path) -> Result<SpellbookVariantsPack, PackError> {
        Self::parse(&read_pack_json(SPELLBOOK_PACK, path)?)
    }
}

// ---------------------------------------------------------------------------
// Two-card combo catalog
// ---------------------------------------------------------------------------

/// One combo pair with canonical ordering `a < b`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComboPair {
    pub a: String,
    pub b: String,
    /// Sorted unique spellbook variant ids backing this pair.
    pub variant_ids: Vec<String>,
}

/// The active combo catalog with the version it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComboCatalog {
    pub version: String,
    /// Pairs sorted by `(a, b)`.
    pub pairs: Vec<ComboPair>,
}

fn parse_pair_v2(row: &Value, index: usize) -> Result<ComboPair, PackError> {
    let key = |field: &str| -> Result<String, PackError> {
        row.get(field)
            .and_then(Value::as_str)
            .and_then(canonical_card_key)
            .ok_or_else(|| {
                PackError::invalid(
                    COMBOS_V2_PACK,
                    &format!("pairs[{index}].{field} must be a non-empty string"),
                )
            })
    };
    let a = key("a")?;
    let b = key("b")?;
    if a == b {
        return Err(PackError::invalid(
            COMBOS_V2_PACK,
            &format!("pairs[{index}] must reference two distinct card keys"),
        ));
    }
    if a > b {
        return Err(PackError::invalid(
            COMBOS_V2_PACK,
            &format!("pairs[{index}] must keep canonical ordering a < b"),
        ));
    }

    let variant_ids_raw = row
        .get("variant_ids")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            PackError::invalid(COMBOS_V2_PACK, &format!("pairs[{index}].variant_ids must be a list"))
        })?;
    let variant_ids = clean_sorted_unique(
        variant_ids_raw
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>(),
    );
    if variant_ids.is_empty() {
        return Err(PackError::invalid(
            COMBOS_V2_PACK,
            &format!("pairs[{index}].variant_ids must include at least one variant id"),
        ));
    }

    Ok(ComboPair { a, b, variant_ids })
}

impl ComboCatalog {
    /// Parse the primary v2 catalog.
    pub fn parse_v2(document: &Value) -> Result<ComboCatalog, PackError> {
        require_object(COMBOS_V2_PACK, document, "root")?;
        let version = require_exact_version(COMBOS_V2_PACK, document, TWO_CARD_COMBOS_V2_VERSION)?;

        let pairs_raw = document
            .get("pairs")
            .and_then(Value::as_array)
            .ok_or_else(|| PackError::invalid(COMBOS_V2_PACK, "pairs must be a list"))?;

        let mut pairs = Vec::with_capacity(pairs_raw.len());
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
        for (index, row) in pairs_raw.iter().enumerate() {
            let pair = parse_pair_v2(row, index)?;
            if !seen.insert((pair.a.clone(), pair.b.clone())) {
                return Err(PackError::invalid(
                    COMBOS_V2_PACK,
                    &format!("duplicate pair ({}, {})", pair.a, pair.b),
                ));
            }
            pairs.push(pair);
        }
        pairs.sort_by(|x, y| (&x.a, &x.b).cmp(&(&y.a, &y.b)));

        Ok(ComboCatalog { version, pairs })
    }

    /// Parse the legacy v1 catalog into the v2 shape (no variant ids).
    pub fn parse_v1(document: &Value) -> Result<ComboCatalog, PackError> {
        require_object(COMBOS_V1_PACK, document, "root")?;
        let version = require_exact_version(COMBOS_V1_PACK, document, TWO_CARD_COMBOS_V1_VERSION)?;

        let mode = document
            .get("mode")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if mode != "pairs_only" {
            return Err(PackError::invalid(
                COMBOS_V1_PACK,
                "mode must equal 'pairs_only'",
            ));
        }

        let pairs_raw = document
            .get("pairs")
            .and_then(Value::as_array)
            .ok_or_else(|| PackError::invalid(COMBOS_V1_PACK, "pairs must be a list"))?;

        let mut pairs = Vec::with_capacity(pairs_raw.len());
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
        for (index, row) in pairs_raw.iter().enumerate() {
            let key = |field: &str| -> Result<String, PackError> {
                row.get(field)
                    .and_then(Value::as_str)
                    .and_then(canonical_card_key)
                    .ok_or_else(|| {
                        PackError::invalid(
                            COMBOS_V1_PACK,
                            &format!("pairs[{index}].{field} must be a non-empty string"),
                        )
                    })
            };
            let first = key("a")?;
            let second = key("b")?;
            if first == second {
                return Err(PackError::invalid(
                    COMBOS_V1_PACK,
                    &format!("pairs[{index}] must reference two distinct card keys"),
                ));
            }
            let (a, b) = if first < second {
                (first, second)
            } else {
                (second, first)
            };
            if !seen.insert((a.clone(), b.clone())) {
                return Err(PackError::invalid(
                    COMBOS_V1_PACK,
                    &format!("duplicate combo pair ({a}, {b})"),
                ));
            }
            pairs.push(ComboPair {
                a,
                b,
                variant_ids: Vec::new(),
            });
        }
        pairs.sort_by(|x, y| (&x.a, &x.b).cmp(&(&y.a, &y.b)));

        Ok(ComboCatalog { version, pairs })
    }

    /// Load v2, falling back to legacy v1 only when v2 is missing.
    pub fn load_prefer_v2(v2_path: &Path, v1_path: &Path) -> Result<ComboCatalog, PackError> {
        match read_pack_json(COMBOS_V2_PACK, v2_path) {
            Ok(document) => Self::parse_v2(&document),
            Err(error) if error.kind == crate::packs::PackErrorKind::Missing => {
                Self::parse_v1(&read_pack_json(COMBOS_V1_PACK, v1_path)?)
            }
            Err(error) => Err(error),
        }
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// One detected combo in a deck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComboMatch {
    pub a: String,
    pub b: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub variant_ids: Vec<String>,
}

/// Bounded, deterministic detection result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComboDetection {
    pub version: String,
    /// Total matches in the deck, before the bound.
    pub count: u64,
    /// First `max_matches` matches in `(a, b)` order.
    pub matches: Vec<ComboMatch>,
}

/// Detect two-card combos present in a deck.
///
/// Deck keys are canonicalized and deduplicated; the catalog's `(a, b)`
/// ordering makes the match list deterministic without a final sort.
pub fn detect_two_card_combos(
    catalog: &ComboCatalog,
    deck_card_keys: &[String],
    max_matches: usize,
) -> ComboDetection {
    let deck_keys: BTreeSet<String> = deck_card_keys
        .iter()
        .filter_map(|key| canonical_card_key(key))
        .collect();

    let mut count: u64 = 0;
    let mut matches = Vec::new();
    for pair in &catalog.pairs {
        if deck_keys.contains(&pair.a) && deck_keys.contains(&pair.b) {
            count += 1;
            if matches.len() < max_matches {
                matches.push(ComboMatch {
                    a: pair.a.clone(),
                    b: pair.b.clone(),
                    variant_ids: pair.variant_ids.clone(),
                });
            }
        }
    }

    ComboDetection {
        version: catalog.version.clone(),
        count,
        matches,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
