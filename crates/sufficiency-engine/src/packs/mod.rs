//! Versioned reference data packs.
//!
//! Each pack is a JSON document with a non-empty `version` field that must
//! equal the expected identifier exactly. Loaders enforce strict schemas:
//! exact key sets where the contract says so, typed numeric ranges, and
//! deterministic normalization (sorted keys, deduplicated lists) so a pack
//! parses to the same in-memory structure regardless of file key order.
//!
//! All pack access at runtime is strictly local file I/O routed through the
//! curated pack manifest; a loader that issued a network request would be a
//! bug, not a feature.

pub mod bucket_substitutions;
pub mod dependency_signatures;
pub mod manifest;
pub mod mulligan_assumptions;
pub mod profile_thresholds;
pub mod required_effects;
pub mod store;
pub mod stress_models;
pub mod stress_operator_policy;
pub mod weight_rules;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// PackError
// ---------------------------------------------------------------------------

/// Failure class for a single pack load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackErrorKind {
    /// The pack file does not exist.
    Missing,
    /// The file exists but is not parseable JSON.
    InvalidJson,
    /// The document violates the pack schema.
    Invalid,
}

impl PackErrorKind {
    fn suffix(self) -> &'static str {
        match self {
            Self::Missing => "MISSING",
            Self::InvalidJson => "INVALID_JSON",
            Self::Invalid => "INVALID",
        }
    }
}

/// A pack load failure carrying its stable code prefix and detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackError {
    /// Stable uppercase pack identifier, e.g. `MULLIGAN_ASSUMPTIONS_V1`.
    pub pack: String,
    pub kind: PackErrorKind,
    pub detail: String,
}

impl PackError {
    pub fn missing(pack: &str, detail: &str) -> PackError {
        PackError {
            pack: pack.to_string(),
            kind: PackErrorKind::Missing,
            detail: detail.to_string(),
        }
    }

    pub fn invalid_json(pack: &str, detail: &str) -> PackError {
        PackError {
            pack: pack.to_string(),
            kind: PackErrorKind::InvalidJson,
            detail: detail.to_string(),
        }
    }

    pub fn invalid(pack: &str, detail: &str) -> PackError {
        PackError {
            pack: pack.to_string(),
            kind: PackErrorKind::Invalid,
            detail: detail.to_string(),
        }
    }

    /// Stable code, e.g. `MULLIGAN_ASSUMPTIONS_V1_MISSING`.
    pub fn code(&self) -> String {
        format!("{}_{}", self.pack, self.kind.suffix())
    }
}

impl fmt::Display for PackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.detail)
    }
}

impl std::error::Error for PackError {}

// ---------------------------------------------------------------------------
// Shared loader helpers
// ---------------------------------------------------------------------------

/// Read and parse a pack file.
pub fn read_pack_json(pack: &str, path: &Path) -> Result<Value, PackError> {
    if !path.is_file() {
        return Err(PackError::missing(pack, &path.display().to_string()));
    }
    let text = std::fs::read_to_string(path)
        .map_err(|_| PackError::invalid_json(pack, &path.display().to_string()))?;
    serde_json::from_str(&text)
        .map_err(|_| PackError::invalid_json(pack, &path.display().to_string()))
}

/// Root object accessor with the standard error.
pub fn require_object<'v>(
    pack: &str,
    value: &'v Value,
    field_path: &str,
) -> Result<&'v serde_json::Map<String, Value>, PackError> {
    value
        .as_object()
        .ok_or_else(|| PackError::invalid(pack, &format!("{field_path} must be an object")))
}

/// Validate the `version` field equals the expected identifier exactly.
pub fn require_exact_version(pack: &str, value: &Value, expected: &str) -> Result<String, PackError> {
    let version = value
        .get("version")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| PackError::invalid(pack, "version must be a non-empty string"))?;
    if version != expected {
        return Err(PackError::invalid(
            pack,
            &format!("version must equal '{expected}'"),
        ));
    }
    Ok(version.to_string())
}

/// Non-empty string field accessor.
pub fn require_nonempty_str(pack: &str, value: &Value, field_path: &str) -> Result<String, PackError> {
    value
        .as_str()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PackError::invalid(pack, &format!("{field_path} must be a non-empty string")))
}

/// Non-negative integer field accessor (booleans are not integers).
pub fn require_nonnegative_int(pack: &str, value: &Value, field_path: &str) -> Result<u32, PackError> {
    value
        .as_u64()
        .filter(|_| !value.is_boolean())
        .and_then(|raw| u32::try_from(raw).ok())
        .ok_or_else(|| {
            PackError::invalid(pack, &format!("{field_path} must be a non-negative integer"))
        })
}

/// Finite numeric field accessor.
pub fn require_number(pack: &str, value: &Value, field_path: &str) -> Result<f64, PackError> {
    value
        .as_f64()
        .filter(|raw| raw.is_finite())
        .ok_or_else(|| PackError::invalid(pack, &format!("{field_path} must be numeric")))
}

/// Numeric field constrained to `[0.0, 1.0]`.
pub fn require_unit_number(pack: &str, value: &Value, field_path: &str) -> Result<f64, PackError> {
    let raw = require_number(pack, value, field_path)?;
    if !(0.0..=1.0).contains(&raw) {
        return Err(PackError::invalid(
            pack,
            &format!("{field_path} must be in [0.0, 1.0]"),
        ));
    }
    Ok(raw)
}

// ===========================================================================
// Tests
// ===========================================================================
