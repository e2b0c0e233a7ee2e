//! `mulligan_assumptions_v1` pack.
//!
//! Per-format mulligan policies with pre-computed `effective_n` per
//! checkpoint. The policy set and checkpoint set are both closed: exactly
//! `{DRAW10_SHUFFLE3, FRIENDLY, NORMAL}` and exactly `{7, 9, 10, 12}`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{read_pack_json, require_exact_version, require_object, PackError};
use crate::CHECKPOINTS;

pub const MULLIGAN_ASSUMPTIONS_VERSION: &str = "mulligan_assumptions_v1";
const PACK: &str = "MULLIGAN_ASSUMPTIONS_V1";

// ---------------------------------------------------------------------------
// MulliganPolicyId
// ---------------------------------------------------------------------------

/// Closed policy vocabulary. Variant order matches the lexicographic order
/// of the wire names, so `Ord` iteration is already payload order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MulliganPolicyId {
    #[serde(rename = "DRAW10_SHUFFLE3")]
    Draw10Shuffle3,
    #[serde(rename = "FRIENDLY")]
    Friendly,
    #[serde(rename = "NORMAL")]
    Normal,
}

impl MulliganPolicyId {
    pub fn all() -> &'static [MulliganPolicyId] {
        &[Self::Draw10Shuffle3, Self::Friendly, Self::Normal]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draw10Shuffle3 => "DRAW10_SHUFFLE3",
            Self::Friendly => "FRIENDLY",
            Self::Normal => "NORMAL",
        }
    }

    fn from_token(token: &str) -> Option<MulliganPolicyId> {
        match token {
            "DRAW10_SHUFFLE3" => Some(Self::Draw10Shuffle3),
            "FRIENDLY" => Some(Self::Friendly),
            "NORMAL" => Some(Self::Normal),
            _ => None,
        }
    }
}

impl fmt::Display for MulliganPolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Pack structure
// ---------------------------------------------------------------------------

/// `effective_n` per checkpoint, raw (clamped and quantized by the layer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyAssumptions {
    pub effective_n_by_checkpoint: BTreeMap<u32, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatMulliganDefaults {
    pub default_policy: MulliganPolicyId,
    pub policies: BTreeMap<MulliganPolicyId, PolicyAssumptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MulliganAssumptionsPack {
    pub version: String,
    pub format_defaults: BTreeMap<String, FormatMulliganDefaults>,
}

fn parse_checkpoint_key(raw: &str) -> Option<u32> {
    let token = raw.trim();
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

fn parse_policy(payload: &Value, field_path: &str) -> Result<PolicyAssumptions, PackError> {
    let rows = payload
        .get("effective_n_by_checkpoint")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            PackError::invalid(
                PACK,
                &format!("{field_path}.effective_n_by_checkpoint must be an object"),
            )
        })?;

    let mut by_checkpoint: BTreeMap<u32, f64> = BTreeMap::new();
    for (key, value) in rows {
        let checkpoint = parse_checkpoint_key(key).ok_or_else(|| {
            PackError::invalid(
                PACK,
                &format!("{field_path} has non-numeric checkpoint key: {key:?}"),
            )
        })?;
        if by_checkpoint.contains_key(&checkpoint) {
            return Err(PackError::invalid(
                PACK,
                &format!("{field_path} has duplicate checkpoint key: {checkpoint}"),
            ));
        }
        let effective_n = super::require_number(
            PACK,
            value,
            &format!("{field_path}.effective_n_by_checkpoint.{checkpoint}"),
        )?;
        by_checkpoint.insert(checkpoint, effective_n);
    }

    let expected: Vec<u32> = CHECKPOINTS.to_vec();
    let actual: Vec<u32> = by_checkpoint.keys().copied().collect();
    if actual != expected {
        return Err(PackError::invalid(
            PACK,
            &format!("{field_path} checkpoints must be exactly {expected:?}"),
        ));
    }

    Ok(PolicyAssumptions {
        effective_n_by_checkpoint: by_checkpoint,
    })
}

impl MulliganAssumptionsPack {
    pub fn parse(document: &Value) -> Result<MulliganAssumptionsPack, PackError> {
        require_object(PACK, document, "root")?;
        let version = require_exact_version(PACK, document, MULLIGAN_ASSUMPTIONS_VERSION)?;

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

            let default_policy_token = super::require_nonempty_str(
                PACK,
                format_payload.get("default_policy").unwrap_or(&Value::Null),
                &format!("{field_path}.default_policy"),
            )?;
            let default_policy =
                MulliganPolicyId::from_token(&default_policy_token).ok_or_else(|| {
                    PackError::invalid(
                        PACK,
                        &format!("{field_path}.default_policy must be a known policy"),
                    )
                })?;

            let policies_raw = format_payload
                .get("policies")
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    PackError::invalid(PACK, &format!("{field_path}.policies must be an object"))
                })?;

            let mut policies: BTreeMap<MulliganPolicyId, PolicyAssumptions> = BTreeMap::new();
            for (policy_key, policy_payload) in policies_raw {
                let policy = MulliganPolicyId::from_token(policy_key.trim()).ok_or_else(|| {
                    PackError::invalid(
                        PACK,
                        &format!("{field_path}.policies has unknown policy {policy_key:?}"),
                    )
                })?;
                if policies.contains_key(&policy) {
                    return Err(PackError::invalid(
                        PACK,
                        &format!("{field_path}.policies has duplicate key {policy}"),
                    ));
                }
                policies.insert(
                    policy,
                    parse_policy(policy_payload, &format!("{field_path}.policies.{policy}"))?,
                );
            }

            if policies.len() != MulliganPolicyId::all().len() {
                return Err(PackError::invalid(
                    PACK,
                    &format!(
                        "{field_path}.policies must be exactly DRAW10_SHUFFLE3, FRIENDLY, NORMAL"
                    ),
                ));
            }

            format_defaults.insert(
                format_key,
                FormatMulliganDefaults {
                    default_policy,
                    policies,
                },
            );
        }

        Ok(MulliganAssumptionsPack {
            version,
            format_defaults,
        })
    }

    pub fn load(path: &Path) -> Result<MulliganAssumptionsPack, PackError> {
        Self::parse(&read_pack_json(PACK, path)?)
    }

    /// Format section lookup with a case-insensitive fallback on the token.
    pub fn format_entry(&self, format: &str) -> Option<&FormatMulliganDefaults> {
        self.format_defaults
            .get(format)
            .or_else(|| self.format_defaults.get(&format.to_lowercase()))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
