//! `dependency_signatures_v1` pack.
//!
//! Maps requirement-flag names to any-of primitive patterns: a flag is true
//! when at least one of its listed primitives covers a deck slot.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{read_pack_json, require_exact_version, require_object, PackError};
use crate::norm::clean_sorted_unique;

pub const DEPENDENCY_SIGNATURES_VERSION: &str = "dependency_signatures_v1";
const PACK: &str = "DEPENDENCY_SIGNATURES_V1";

/// One any-of signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRule {
    /// Sorted unique primitive ids; at least one.
    pub any_required_primitives: Vec<String>,
}

/// Parsed pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySignaturesPack {
    pub version: String,
    pub signatures: BTreeMap<String, SignatureRule>,
}

impl DependencySignaturesPack {
    pub fn parse(document: &Value) -> Result<DependencySignaturesPack, PackError> {
        require_object(PACK, document, "root")?;
        let version = require_exact_version(PACK, document, DEPENDENCY_SIGNATURES_VERSION)?;

        let signatures_raw = document
            .get("signatures")
            .and_then(Value::as_object)
            .ok_or_else(|| PackError::invalid(PACK, "signatures must be an object"))?;

        let mut signatures = BTreeMap::new();
        for (key, payload) in signatures_raw {
            let name = crate::norm::nonempty_token(key)
                .ok_or_else(|| PackError::invalid(PACK, "signatures keys must be non-empty strings"))?;

            let primitives_raw = payload
                .get("any_required_primitives")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    PackError::invalid(
                        PACK,
                        &format!("signatures.{name}.any_required_primitives must be an array"),
                    )
                })?;
            let primitives = clean_sorted_unique(
                primitives_raw
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>(),
            );
            if primitives.is_empty() {
                return Err(PackError::invalid(
                    PACK,
                    &format!(
                        "signatures.{name}.any_required_primitives must include at least one primitive"
                    ),
                ));
            }

            signatures.insert(
                name,
                SignatureRule {
                    any_required_primitives: primitives,
                },
            );
        }

        Ok(DependencySignaturesPack {
            version,
            signatures,
        })
    }

    pub fn load(path: &Path) -> Result<DependencySignaturesPack, PackError> {
        Self::parse(&read_pack_json(PACK, path)?)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_and_normalizes() {
        let doc = json!({
            "version": "dependency_signatures_v1",
            "signatures": {
                "graveyard_engine": {
                    "any_required_primitives": [" RECURSION ", "SELF_MILL", "RECURSION"]
                }
            }
        });
        let pack = DependencySignaturesPack::parse(&doc).unwrap();
        assert_eq!(
            pack.signatures["graveyard_engine"].any_required_primitives,
            ["RECURSION", "SELF_MILL"]
        );
    }

    #[test]
    fn empty_primitive_list_rejected() {
        let doc = json!({
            "version": "dependency_signatures_v1",
            "signatures": {"x": {"any_required_primitives": []}}
        });
        let err = DependencySignaturesPack::parse(&doc).unwrap_err();
        assert_eq!(err.code(), "DEPENDENCY_SIGNATURES_V1_INVALID");
    }

    #[test]
    fn wrong_version_rejected() {
        let doc = json!({"version": "dependency_signatures_v2", "signatures": {}});
        assert!(DependencySignaturesPack::parse(&doc).is_err());
    }
}
