//! `stress_operator_policy_v1` pack.
//!
//! Governs the canonical order the transform applies operators in:
//! precedence ranks, the default `by_turn` per operator, and the
//! sequential-composition pin. The tie-break and composition mode are
//! frozen strings; anything else is an invalid pack.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    read_pack_json, require_exact_version, require_nonnegative_int, require_object, PackError,
};

pub const STRESS_OPERATOR_POLICY_VERSION: &str = "stress_operator_policy_v1";
const PACK: &str = "STRESS_OPERATOR_POLICY_V1";

/// Frozen tie-break identifier.
pub const TIE_BREAK_OP_NAME_THEN_JSON: &str = "op_name_then_json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionPolicy {
    /// Always `"sequential"`.
    pub mode: String,
    pub record_impacts: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressOperatorPolicyPack {
    pub version: String,
    /// Operator names in precedence order.
    pub precedence: Vec<String>,
    pub tie_break: String,
    pub default_by_turn: BTreeMap<String, u32>,
    pub composition: CompositionPolicy,
}

impl StressOperatorPolicyPack {
    pub fn parse(document: &Value) -> Result<StressOperatorPolicyPack, PackError> {
        let object = require_object(PACK, document, "root")?;

        let expected_keys = [
            "composition",
            "default_by_turn",
            "precedence",
            "tie_break",
            "version",
        ];
        let mut actual: Vec<&str> = object.keys().map(String::as_str).collect();
        actual.sort_unstable();
        if actual != expected_keys {
            return Err(PackError::invalid(
                PACK,
                &format!("root keys must be exactly {expected_keys:?}"),
            ));
        }

        let version = require_exact_version(PACK, document, STRESS_OPERATOR_POLICY_VERSION)?;

        let tie_break = super::require_nonempty_str(
            PACK,
            document.get("tie_break").unwrap_or(&Value::Null),
            "tie_break",
        )?;
        if tie_break != TIE_BREAK_OP_NAME_THEN_JSON {
            return Err(PackError::invalid(
                PACK,
                &format!("tie_break must be '{TIE_BREAK_OP_NAME_THEN_JSON}'"),
            ));
        }

        let precedence_raw = document
            .get("precedence")
            .and_then(Value::as_array)
            .ok_or_else(|| PackError::invalid(PACK, "precedence must be an array"))?;
        let mut precedence = Vec::with_capacity(precedence_raw.len());
        for (index, value) in precedence_raw.iter().enumerate() {
            let op = value
                .as_str()
                .and_then(crate::norm::nonempty_token)
                .ok_or_else(|| {
                    PackError::invalid(PACK, &format!("precedence[{index}] must be a non-empty string"))
                })?;
            if precedence.contains(&op) {
                return Err(PackError::invalid(
                    PACK,
                    &format!("precedence contains duplicate operator {op}"),
                ));
            }
            precedence.push(op);
        }
        if precedence.is_empty() {
            return Err(PackError::invalid(PACK, "precedence must be non-empty"));
        }

        let default_by_turn_raw = document
            .get("default_by_turn")
            .and_then(Value::as_object)
            .ok_or_else(|| PackError::invalid(PACK, "default_by_turn must be an object"))?;
        let mut default_by_turn = BTreeMap::new();
        for (op_key, value) in default_by_turn_raw {
            let op = crate::norm::nonempty_token(op_key).ok_or_else(|| {
                PackError::invalid(PACK, "default_by_turn keys must be non-empty strings")
            })?;
            if !precedence.contains(&op) {
                return Err(PackError::invalid(
                    PACK,
                    &format!("default_by_turn.{op} references unknown operator"),
                ));
            }
            let turn = require_nonnegative_int(PACK, value, &format!("default_by_turn.{op}"))?;
            default_by_turn.insert(op, turn);
        }

        let composition_raw = document
            .get("composition")
            .and_then(Value::as_object)
            .ok_or_else(|| PackError::invalid(PACK, "composition must be an object"))?;
        let mut composition_keys: Vec<&str> = composition_raw.keys().map(String::as_str).collect();
        composition_keys.sort_unstable();
        if composition_keys != ["mode", "record_impacts"] {
            return Err(PackError::invalid(
                PACK,
                "composition keys must be exactly [\"mode\", \"record_impacts\"]",
            ));
        }
        let mode = composition_raw
            .get("mode")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|token| *token == "sequential")
            .ok_or_else(|| PackError::invalid(PACK, "composition.mode must be 'sequential'"))?;
        let record_impacts = composition_raw
            .get("record_impacts")
            .and_then(Value::as_bool)
            .ok_or_else(|| PackError::invalid(PACK, "composition.record_impacts must be bool"))?;

        Ok(StressOperatorPolicyPack {
            version,
            precedence,
            tie_break,
            default_by_turn,
            composition: CompositionPolicy {
                mode: mode.to_string(),
                record_impacts,
            },
        })
    }

    pub fn load(path: &Path) -> Result<StressOperatorPolicyPack, PackError> {
        Self::parse(&read_pack_json(PACK, path)?)
    }

    /// Precedence rank of an operator name; unknown names rank last.
    pub fn precedence_rank(&self, op_name: &str) -> usize {
        self.precedence
            .iter()
            .position(|op| op == op_name)
            .unwrap_or(usize::MAX)
    }

    pub fn default_turn_for(&self, op_name: &str) -> Option<u32> {
        self.default_by_turn.get(op_name).copied()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
