//! `bucket_substitutions_v1` pack.
//!
//! Per-format bucket definitions: primary primitives, always-active base
//! substitutions, and requirement-flag-gated conditional substitutions.
//! Conditional depth is bounded to this single level; there is no recursive
//! expansion.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    read_pack_json, require_exact_version, require_nonempty_str, require_object,
    require_unit_number, PackError,
};
use crate::fixed::Fixed6;
use crate::norm::clean_sorted_unique;

pub const BUCKET_SUBSTITUTIONS_VERSION: &str = "bucket_substitutions_v1";
const PACK: &str = "BUCKET_SUBSTITUTIONS_V1";

// ---------------------------------------------------------------------------
// Pack structure
// ---------------------------------------------------------------------------

/// One weighted substitution primitive. Weight is already quantized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionRow {
    pub primitive: String,
    pub weight: Fixed6,
}

/// Substitutions that activate only when a requirement flag is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalSubstitution {
    pub requirement_flag: String,
    pub substitutions: Vec<SubstitutionRow>,
}

/// One named bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketDefinition {
    /// Sorted unique primary primitives.
    pub primary_primitives: Vec<String>,
    pub base_substitutions: Vec<SubstitutionRow>,
    pub conditional_substitutions: Vec<ConditionalSubstitution>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatBuckets {
    pub buckets: BTreeMap<String, BucketDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSubstitutionsPack {
    pub version: String,
    pub format_defaults: BTreeMap<String, FormatBuckets>,
}

fn parse_substitution_rows(raw: Option<&Value>, field_path: &str) -> Result<Vec<SubstitutionRow>, PackError> {
    let Some(rows) = raw.and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    let mut parsed = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let primitive = require_nonempty_str(
            PACK,
            row.get("primitive").unwrap_or(&Value::Null),
            &format!("{field_path}[{index}].primitive"),
        )?;
        let weight_raw = require_unit_number(
            PACK,
            row.get("weight").unwrap_or(&Value::Null),
            &format!("{field_path}[{index}].weight"),
        )?;
        let weight = Fixed6::quantize_f64(weight_raw).ok_or_else(|| {
            PackError::invalid(PACK, &format!("{field_path}[{index}].weight must be finite"))
        })?;
        parsed.push(SubstitutionRow { primitive, weight });
    }
    Ok(parsed)
}

fn parse_bucket(payload: &Value, field_path: &str) -> Result<BucketDefinition, PackError> {
    require_object(PACK, payload, field_path)?;

    let primary = payload
        .get("primary_primitives")
        .and_then(Value::as_array)
        .map(|rows| {
            clean_sorted_unique(rows.iter().filter_map(Value::as_str).collect::<Vec<_>>())
        })
        .unwrap_or_default();

    let base = parse_substitution_rows(
        payload.get("base_substitutions"),
        &format!("{field_path}.base_substitutions"),
    )?;

    let mut conditional = Vec::new();
    if let Some(rows) = payload
        .get("conditional_substitutions")
        .and_then(Value::as_array)
    {
        for (index, row) in rows.iter().enumerate() {
            let requirement_flag = require_nonempty_str(
                PACK,
                row.get("requirement_flag").unwrap_or(&Value::Null),
                &format!("{field_path}.conditional_substitutions[{index}].requirement_flag"),
            )?;
            let substitutions = parse_substitution_rows(
                row.get("substitutions"),
                &format!("{field_path}.conditional_substitutions[{index}].substitutions"),
            )?;
            conditional.push(ConditionalSubstitution {
                requirement_flag,
                substitutions,
            });
        }
    }

    Ok(BucketDefinition {
        primary_primitives: primary,
        base_substitutions: base,
        conditional_substitutions: conditional,
    })
}

impl BucketSubstitutionsPack {
    pub fn parse(document: &Value) -> Result<BucketSubstitutionsPack, PackError> {
        require_object(PACK, document, "root")?;
        let version = require_exact_version(PACK, document, BUCKET_SUBSTITUTIONS_VERSION)?;

        let format_defaults_raw = document
            .get("format_defaults")
            .and_then(Value::as_object)
            .ok_or_else(|| PackError::invalid(PACK, "format_defaults must be an object"))?;

        let mut format_defaults = BTreeMap::new();
        for (format_key, format_payload) in format_defaults_raw {
            let format_key = crate::norm::nonempty_token(format_key).ok_or_else(|| {
                PackError::invalid(PACK, "format_defaults keys must be non-empty strings")
            })?;

            let buckets_raw = format_payload
                .get("buckets")
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    PackError::invalid(
                        PACK,
                        &format!("format_defaults.{format_key}.buckets must be an object"),
                    )
                })?;

            let mut buckets = BTreeMap::new();
            for (bucket_key, bucket_payload) in buckets_raw {
                let bucket_key = crate::norm::nonempty_token(bucket_key).ok_or_else(|| {
                    PackError::invalid(PACK, "bucket keys must be non-empty strings")
                })?;
                buckets.insert(
                    bucket_key.clone(),
                    parse_bucket(
                        bucket_payload,
                        &format!("format_defaults.{format_key}.buckets.{bucket_key}"),
                    )?,
                );
            }

            format_defaults.insert(format_key, FormatBuckets { buckets });
        }

        Ok(BucketSubstitutionsPack {
            version,
            format_defaults,
        })
    }

    pub fn load(path: &Path) -> Result<BucketSubstitutionsPack, PackError> {
        Self::parse(&read_pack_json(PACK, path)?)
    }

    pub fn format_entry(&self, format: &str) -> Option<&FormatBuckets> {
        self.format_defaults
            .get(format)
            .or_else(|| self.format_defaults.get(&format.to_lowercase()))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
