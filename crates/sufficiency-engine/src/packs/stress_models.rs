//! `stress_models_v1` pack: named operator sequences plus the selection
//! table that maps profile/bracket pairs to a model.
//!
//! `Operator` is a closed sum. Consumers pattern-match exhaustively; adding
//! a variant is a breaking change that requires a pipeline-version bump.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    read_pack_json, require_exact_version, require_nonempty_str, require_nonnegative_int,
    require_object, require_unit_number, PackError,
};
use crate::fixed::Fixed6;

pub const STRESS_MODELS_VERSION: &str = "stress_models_v1";
const PACK: &str = "STRESS_MODELS_V1";

// ---------------------------------------------------------------------------
// Operator
// ---------------------------------------------------------------------------

/// One stress operator with its numeric parameters.
///
/// K-stage operators mutate `effective_K` and force a probability
/// recomputation; probability-stage operators scale checkpoint
/// probabilities directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Operator {
    #[serde(rename = "TARGETED_REMOVAL")]
    TargetedRemoval { count: u32 },
    #[serde(rename = "BOARD_WIPE")]
    BoardWipe {
        by_turn: u32,
        surviving_engine_fraction: Fixed6,
    },
    #[serde(rename = "GRAVEYARD_HATE_WINDOW")]
    GraveyardHateWindow {
        turns: Vec<u32>,
        graveyard_penalty: Fixed6,
    },
    #[serde(rename = "STAX_TAX")]
    StaxTax { by_turn: u32, inflation_factor: Fixed6 },
    #[serde(rename = "WHEEL")]
    Wheel {
        #[serde(skip_serializing_if = "Option::is_none")]
        by_turn: Option<u32>,
        wheel_penalty: Fixed6,
    },
    #[serde(rename = "HAND_DISRUPTION")]
    HandDisruption {
        #[serde(skip_serializing_if = "Option::is_none")]
        by_turn: Option<u32>,
        count: u32,
    },
    #[serde(rename = "COMBAT_PRESSURE")]
    CombatPressure {
        #[serde(skip_serializing_if = "Option::is_none")]
        by_turn: Option<u32>,
        pressure_penalty: Fixed6,
    },
}

impl Operator {
    /// Canonical wire tag.
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::TargetedRemoval { .. } => "TARGETED_REMOVAL",
            Self::BoardWipe { .. } => "BOARD_WIPE",
            Self::GraveyardHateWindow { .. } => "GRAVEYARD_HATE_WINDOW",
            Self::StaxTax { .. } => "STAX_TAX",
            Self::Wheel { .. } => "WHEEL",
            Self::HandDisruption { .. } => "HAND_DISRUPTION",
            Self::CombatPressure { .. } => "COMBAT_PRESSURE",
        }
    }

    /// Whether this operator mutates `effective_K` (K-stage) rather than
    /// the probabilities directly.
    pub fn is_k_stage(&self) -> bool {
        matches!(
            self,
            Self::TargetedRemoval { .. }
                | Self::BoardWipe { .. }
                | Self::GraveyardHateWindow { .. }
                | Self::HandDisruption { .. }
        )
    }

    /// Serialized form used for output rows and ordering tie-breaks.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Canonical JSON string for deterministic tie-breaks.
    pub fn canonical_json(&self) -> String {
        crate::canonical::canonical_json(&self.to_value())
    }

    /// Parse and validate one operator row.
    pub fn parse(row: &Value, field_path: &str) -> Result<Operator, PackError> {
        require_object(PACK, row, field_path)?;
        let op = require_nonempty_str(
            PACK,
            row.get("op").unwrap_or(&Value::Null),
            &format!("{field_path}.op"),
        )?;

        let get = |key: &str| row.get(key).unwrap_or(&Value::Null);
        let unit = |key: &str| -> Result<Fixed6, PackError> {
            let raw = require_unit_number(PACK, get(key), &format!("{field_path}.{key}"))?;
            Fixed6::quantize_f64(raw)
                .ok_or_else(|| PackError::invalid(PACK, &format!("{field_path}.{key} must be finite")))
        };
        let turn = |key: &str| require_nonnegative_int(PACK, get(key), &format!("{field_path}.{key}"));
        let optional_turn = |key: &str| -> Result<Option<u32>, PackError> {
            if row.get(key).is_none() {
                return Ok(None);
            }
            turn(key).map(Some)
        };

        match op.as_str() {
            "TARGETED_REMOVAL" => Ok(Operator::TargetedRemoval {
                count: turn("count")?,
            }),
            "BOARD_WIPE" => Ok(Operator::BoardWipe {
                by_turn: turn("by_turn")?,
                surviving_engine_fraction: unit("surviving_engine_fraction")?,
            }),
            "GRAVEYARD_HATE_WINDOW" => {
                let turns_raw = get("turns").as_array().ok_or_else(|| {
                    PackError::invalid(PACK, &format!("{field_path}.turns must be a list"))
                })?;
                let mut turns: Vec<u32> = turns_raw
                    .iter()
                    .filter_map(Value::as_u64)
                    .filter_map(|raw| u32::try_from(raw).ok())
                    .collect();
                turns.sort_unstable();
                turns.dedup();
                if turns.is_empty() {
                    return Err(PackError::invalid(
                        PACK,
                        &format!("{field_path}.turns must include at least one turn"),
                    ));
                }
                Ok(Operator::GraveyardHateWindow {
                    turns,
                    graveyard_penalty: unit("graveyard_penalty")?,
                })
            }
            "STAX_TAX" => {
                let raw = super::require_number(PACK, get("inflation_factor"), &format!("{field_path}.inflation_factor"))?;
                if raw < 0.0 {
                    return Err(PackError::invalid(
                        PACK,
                        &format!("{field_path}.inflation_factor must be >= 0.0"),
                    ));
                }
                let inflation_factor = Fixed6::quantize_f64(raw).ok_or_else(|| {
                    PackError::invalid(PACK, &format!("{field_path}.inflation_factor must be finite"))
                })?;
                Ok(Operator::StaxTax {
                    by_turn: turn("by_turn")?,
                    inflation_factor,
                })
            }
            "WHEEL" => {
                let wheel_penalty = if row.get("wheel_penalty").is_none() {
                    Fixed6::from_micros(900_000)
                } else {
                    unit("wheel_penalty")?
                };
                Ok(Operator::Wheel {
                    by_turn: optional_turn("by_turn")?,
                    wheel_penalty,
                })
            }
            "HAND_DISRUPTION" => {
                let count = if row.get("count").is_none() {
                    1
                } else {
                    turn("count")?
                };
                Ok(Operator::HandDisruption {
                    by_turn: optional_turn("by_turn")?,
                    count,
                })
            }
            "COMBAT_PRESSURE" => {
                let pressure_penalty = if row.get("pressure_penalty").is_none() {
                    Fixed6::from_micros(950_000)
                } else {
                    unit("pressure_penalty")?
                };
                Ok(Operator::CombatPressure {
                    by_turn: optional_turn("by_turn")?,
                    pressure_penalty,
                })
            }
            other => Err(PackError::invalid(
                PACK,
                &format!("{field_path}.op '{other}' is not a known operator"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Selection + models
// ---------------------------------------------------------------------------

/// Exact profile/bracket pair selection row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileBracketRule {
    pub profile_id: String,
    pub bracket_id: String,
    pub model_id: String,
}

/// Model selection table; precedence is resolved by the definition layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StressSelection {
    pub default_model_id: Option<String>,
    pub by_profile_id: BTreeMap<String, String>,
    pub by_bracket_id: BTreeMap<String, String>,
    pub by_profile_bracket: Vec<ProfileBracketRule>,
}

/// One named operator sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressModel {
    pub operators: Vec<Operator>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatStressModels {
    pub selection: StressSelection,
    pub models: BTreeMap<String, StressModel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressModelsPack {
    pub version: String,
    pub format_defaults: BTreeMap<String, FormatStressModels>,
}

fn parse_id_map(raw: Option<&Value>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(map) = raw.and_then(Value::as_object) {
        for (key, value) in map {
            let Some(key) = crate::norm::nonempty_token(key) else {
                continue;
            };
            let Some(model_id) = value.as_str().and_then(crate::norm::nonempty_token) else {
                continue;
            };
            out.insert(key, model_id);
        }
    }
    out
}

fn parse_selection(raw: &Value, field_path: &str) -> Result<StressSelection, PackError> {
    require_object(PACK, raw, field_path)?;

    let default_model_id = raw
        .get("default_model_id")
        .and_then(Value::as_str)
        .and_then(crate::norm::nonempty_token);

    let mut by_profile_bracket = Vec::new();
    if let Some(rows) = raw.get("by_profile_bracket").and_then(Value::as_array) {
        for (index, row) in rows.iter().enumerate() {
            let row_path = format!("{field_path}.by_profile_bracket[{index}]");
            by_profile_bracket.push(ProfileBracketRule {
                profile_id: require_nonempty_str(
                    PACK,
                    row.get("profile_id").unwrap_or(&Value::Null),
                    &format!("{row_path}.profile_id"),
                )?,
                bracket_id: require_nonempty_str(
                    PACK,
                    row.get("bracket_id").unwrap_or(&Value::Null),
                    &format!("{row_path}.bracket_id"),
                )?,
                model_id: require_nonempty_str(
                    PACK,
                    row.get("model_id").unwrap_or(&Value::Null),
                    &format!("{row_path}.model_id"),
                )?,
            });
        }
    }

    Ok(StressSelection {
        default_model_id,
        by_profile_id: parse_id_map(raw.get("by_profile_id")),
        by_bracket_id: parse_id_map(raw.get("by_bracket_id")),
        by_profile_bracket,
    })
}

impl StressModelsPack {
    pub fn parse(document: &Value) -> Result<StressModelsPack, PackError> {
        require_object(PACK, document, "root")?;
        let version = require_exact_version(PACK, document, STRESS_MODELS_VERSION)?;

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

            let selection = parse_selection(
                format_payload.get("selection").unwrap_or(&Value::Null),
                &format!("{field_path}.selection"),
            )?;

            let models_raw = format_payload
                .get("models")
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    PackError::invalid(PACK, &format!("{field_path}.models must be an object"))
                })?;

            let mut models = BTreeMap::new();
            for (model_id, model_payload) in models_raw {
                let model_id = crate::norm::nonempty_token(model_id).ok_or_else(|| {
                    PackError::invalid(PACK, "model ids must be non-empty strings")
                })?;
                let operators_raw = model_payload
                    .get("operators")
                    .and_then(Value::as_array)
                    .ok_or_else(|| {
                        PackError::invalid(
                            PACK,
                            &format!("{field_path}.models.{model_id}.operators must be a list"),
                        )
                    })?;
                let operators = operators_raw
                    .iter()
                    .enumerate()
                    .map(|(index, row)| {
                        Operator::parse(
                            row,
                            &format!("{field_path}.models.{model_id}.operators[{index}]"),
                        )
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                models.insert(model_id, StressModel { operators });
            }

            format_defaults.insert(format_key, FormatStressModels { selection, models });
        }

        Ok(StressModelsPack {
            version,
            format_defaults,
        })
    }

    pub fn load(path: &Path) -> Result<StressModelsPack, PackError> {
        Self::parse(&read_pack_json(PACK, path)?)
    }

    pub fn format_entry(&self, format: &str) -> Option<&FormatStressModels> {
        self.format_defaults
            .get(format)
            .or_else(|| self.format_defaults.get(&format.to_lowercase()))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
