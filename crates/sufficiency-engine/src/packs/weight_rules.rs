//! `weight_rules_v1` pack.
//!
//! Per-format conditional multiplier rules. A rule applies only when its
//! requirement flag is exactly boolean true; runtime expression evaluation
//! is forbidden, flags match by name equality alone.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    read_pack_json, require_exact_version, require_nonempty_str, require_number, require_object,
    PackError,
};
use crate::fixed::Fixed6;

pub const WEIGHT_RULES_VERSION: &str = "weight_rules_v1";
const PACK: &str = "WEIGHT_RULES_V1";

/// One multiplier rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightRule {
    pub rule_id: String,
    pub target_bucket: String,
    pub requirement_flag: String,
    /// Non-negative multiplier, quantized.
    pub multiplier: Fixed6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatWeightRules {
    /// Rules in evaluation order: `(target_bucket, rule_id,
    /// requirement_flag, multiplier)` ascending.
    pub rules: Vec<WeightRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightRulesPack {
    pub version: String,
    pub format_defaults: BTreeMap<String, FormatWeightRules>,
}

impl WeightRulesPack {
    pub fn parse(document: &Value) -> Result<WeightRulesPack, PackError> {
        require_object(PACK, document, "root")?;
        let version = require_exact_version(PACK, document, WEIGHT_RULES_VERSION)?;

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

            let rules_raw = format_payload
                .get("rules")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    PackError::invalid(PACK, &format!("{field_path}.rules must be a list"))
                })?;

            let mut rules = Vec::with_capacity(rules_raw.len());
            let mut seen_rule_ids: BTreeSet<String> = BTreeSet::new();
            for (index, row) in rules_raw.iter().enumerate() {
                let row_path = format!("{field_path}.rules[{index}]");
                let rule_id = require_nonempty_str(
                    PACK,
                    row.get("rule_id").unwrap_or(&Value::Null),
                    &format!("{row_path}.rule_id"),
                )?;
                if !seen_rule_ids.insert(rule_id.clone()) {
                    return Err(PackError::invalid(
                        PACK,
                        &format!("{field_path} has duplicate rule_id '{rule_id}'"),
                    ));
                }
                let target_bucket = require_nonempty_str(
                    PACK,
                    row.get("target_bucket").unwrap_or(&Value::Null),
                    &format!("{row_path}.target_bucket"),
                )?;
                let requirement_flag = require_nonempty_str(
                    PACK,
                    row.get("requirement_flag").unwrap_or(&Value::Null),
                    &format!("{row_path}.requirement_flag"),
                )?;
                let multiplier_raw = require_number(
                    PACK,
                    row.get("multiplier").unwrap_or(&Value::Null),
                    &format!("{row_path}.multiplier"),
                )?;
                if multiplier_raw < 0.0 {
                    return Err(PackError::invalid(
                        PACK,
                        &format!("{row_path}.multiplier must be >= 0.0"),
                    ));
                }
                let multiplier = Fixed6::quantize_f64(multiplier_raw).ok_or_else(|| {
                    PackError::invalid(PACK, &format!("{row_path}.multiplier must be finite"))
                })?;

                rules.push(WeightRule {
                    rule_id,
                    target_bucket,
                    requirement_flag,
                    multiplier,
                });
            }

            rules.sort_by(|a, b| {
                (
                    &a.target_bucket,
                    &a.rule_id,
                    &a.requirement_flag,
                    a.multiplier,
                )
                    .cmp(&(
                        &b.target_bucket,
                        &b.rule_id,
                        &b.requirement_flag,
                        b.multiplier,
                    ))
            });

            format_defaults.insert(format_key, FormatWeightRules { rules });
        }

        Ok(WeightRulesPack {
            version,
            format_defaults,
        })
    }

    pub fn load(path: &Path) -> Result<WeightRulesPack, PackError> {
        Self::parse(&read_pack_json(PACK, path)?)
    }

    pub fn format_entry(&self, format: &str) -> Option<&FormatWeightRules> {
        self.format_defaults
            .get(format)
            .or_else(|| self.format_defaults.get(&format.to_lowercase()))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pack_doc() -> Value {
        json!({
            "version": "weight_rules_v1",
            "format_defaults": {
                "commander": {
                    "rules": [
                        {
                            "rule_id": "r2",
                            "target_bucket": "REMOVAL",
                            "requirement_flag": "stax_heavy_meta",
                            "multiplier": 1.2
                        },
                        {
                            "rule_id": "r1",
                            "target_bucket": "RAMP",
                            "requirement_flag": "mana_hungry",
                            "multiplier": 0.9
                        }
                    ]
                }
            }
        })
    }

    #[test]
    fn rules_sort_by_bucket_then_rule_id() {
        let pack = WeightRulesPack::parse(&pack_doc()).unwrap();
        let rules = &pack.format_entry("commander").unwrap().rules;
        assert_eq!(rules[0].rule_id, "r1");
        assert_eq!(rules[0].target_bucket, "RAMP");
        assert_eq!(rules[1].target_bucket, "REMOVAL");
    }

    #[test]
    fn duplicate_rule_id_rejected() {
        let mut doc = pack_doc();
        doc["format_defaults"]["commander"]["rules"][1]["rule_id"] = json!("r2");
        assert!(WeightRulesPack::parse(&doc).is_err());
    }

    #[test]
    fn negative_multiplier_rejected() {
        let mut doc = pack_doc();
        doc["format_defaults"]["commander"]["rules"][0]["multiplier"] = json!(-0.5);
        assert!(WeightRulesPack::parse(&doc).is_err());
    }
}
