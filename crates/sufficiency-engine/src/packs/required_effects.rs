//! `required_effects_v1` pack.
//!
//! Per-format minimum slot counts for required primitives, plus the list of
//! primitive ids the runtime taxonomy can actually evaluate. Requirements
//! for unsupported primitives surface as unknowns, never as silent passes.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    read_pack_json, require_exact_version, require_nonnegative_int, require_object, PackError,
};
use crate::norm::clean_sorted_unique;

pub const REQUIRED_EFFECTS_VERSION: &str = "required_effects_v1";
const PACK: &str = "REQUIRED_EFFECTS_V1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredEffectsPack {
    pub version: String,
    /// Format to `{primitive -> min slot count}`.
    pub format_defaults: BTreeMap<String, BTreeMap<String, u32>>,
    /// Primitive ids the runtime taxonomy supports, sorted unique.
    pub taxonomy_primitive_ids: Vec<String>,
}

impl RequiredEffectsPack {
    pub fn parse(document: &Value) -> Result<RequiredEffectsPack, PackError> {
        require_object(PACK, document, "root")?;
        let version = require_exact_version(PACK, document, REQUIRED_EFFECTS_VERSION)?;

        let format_defaults_raw = document
            .get("format_defaults")
            .and_then(Value::as_object)
            .ok_or_else(|| PackError::invalid(PACK, "format_defaults must be an object"))?;

        let mut format_defaults = BTreeMap::new();
        for (format_key, format_payload) in format_defaults_raw {
            let format_key = crate::norm::nonempty_token(format_key).ok_or_else(|| {
                PackError::invalid(PACK, "format_defaults keys must be non-empty strings")
            })?;
            let requirements_raw = format_payload.as_object().ok_or_else(|| {
                PackError::invalid(PACK, &format!("format_defaults.{format_key} must be an object"))
            })?;

            let mut requirements = BTreeMap::new();
            for (primitive_key, entry) in requirements_raw {
                let primitive_id = crate::norm::nonempty_token(primitive_key).ok_or_else(|| {
                    PackError::invalid(PACK, "requirement keys must be non-empty strings")
                })?;
                let minimum = require_nonnegative_int(
                    PACK,
                    entry.get("min").unwrap_or(&Value::Null),
                    &format!("format_defaults.{format_key}.{primitive_id}.min"),
                )?;
                requirements.insert(primitive_id, minimum);
            }
            format_defaults.insert(format_key, requirements);
        }

        let taxonomy_primitive_ids = document
            .get("taxonomy_primitive_ids")
            .and_then(Value::as_array)
            .map(|rows| clean_sorted_unique(rows.iter().filter_map(Value::as_str).collect::<Vec<_>>()))
            .unwrap_or_default();

        Ok(RequiredEffectsPack {
            version,
            format_defaults,
            taxonomy_primitive_ids,
        })
    }

    pub fn load(path: &Path) -> Result<RequiredEffectsPack, PackError> {
        Self::parse(&read_pack_json(PACK, path)?)
    }

    pub fn requirements_for(&self, format: &str) -> Option<&BTreeMap<String, u32>> {
        self.format_defaults
            .get(format)
            .or_else(|| self.format_defaults.get(&format.to_lowercase()))
    }

    pub fn supports_primitive(&self, primitive_id: &str) -> bool {
        self.taxonomy_primitive_ids
            .binary_search_by(|candidate| candidate.as_str().cmp(primitive_id))
            .is_ok()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
