//! One-shot pack loading into an immutable store.
//!
//! Packs are loaded once at pipeline start and shared by read-only
//! reference across all layers. A pack that is absent or fails its schema
//! leaves its slot empty and records the failure code; the layers that
//! depend on it SKIP. Manifest-level failures (bad manifest, on-disk hash
//! mismatch) are hard errors: nothing runs against unverified bytes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::bucket_substitutions::BucketSubstitutionsPack;
use super::dependency_signatures::DependencySignaturesPack;
use super::manifest::{ManifestError, PackManifest};
use super::mulligan_assumptions::MulliganAssumptionsPack;
use super::profile_thresholds::ProfileThresholdsPack;
use super::required_effects::RequiredEffectsPack;
use super::stress_models::StressModelsPack;
use super::stress_operator_policy::StressOperatorPolicyPack;
use super::weight_rules::WeightRulesPack;
use super::PackError;
use crate::combos::ComboCatalog;

/// Manifest file name at the pack root.
pub const MANIFEST_FILE_NAME: &str = "curated_pack_manifest_v1.json";

/// Immutable pack set for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackStore {
    pub dependency_signatures: Option<DependencySignaturesPack>,
    pub mulligan_assumptions: Option<MulliganAssumptionsPack>,
    pub bucket_substitutions: Option<BucketSubstitutionsPack>,
    pub weight_rules: Option<WeightRulesPack>,
    pub stress_models: Option<StressModelsPack>,
    pub stress_operator_policy: Option<StressOperatorPolicyPack>,
    pub profile_thresholds: Option<ProfileThresholdsPack>,
    pub required_effects: Option<RequiredEffectsPack>,
    pub combo_catalog: Option<ComboCatalog>,
    /// Sorted codes for every pack that failed to load.
    pub load_errors: Vec<String>,
}

impl PackStore {
    /// A store with no packs: every dependent layer SKIPs.
    pub fn empty() -> PackStore {
        PackStore::default()
    }

    /// Load all packs through the curated manifest at `repo_root`.
    ///
    /// The manifest itself and every referenced file hash must validate;
    /// individual pack absence or schema failure degrades to an empty slot
    /// with its code recorded.
    pub fn load(repo_root: &Path) -> Result<PackStore, ManifestError> {
        let manifest = PackManifest::load(&repo_root.join(MANIFEST_FILE_NAME))?;
        manifest.validate_hashes(repo_root)?;

        let mut store = PackStore::empty();
        let mut load_errors: Vec<String> = Vec::new();

        fn slot<T>(
            manifest: &PackManifest,
            repo_root: &Path,
            pack_id: &str,
            parse: impl Fn(&Path) -> Result<T, PackError>,
            load_errors: &mut Vec<String>,
        ) -> Option<T> {
            let path = match manifest.resolve_pack_file_path(repo_root, pack_id, None) {
                Ok(path) => path,
                Err(error) => {
                    load_errors.push(error.code().to_string());
                    return None;
                }
            };
            match parse(&path) {
                Ok(pack) => Some(pack),
                Err(error) => {
                    load_errors.push(error.code());
                    None
                }
            }
        }

        store.dependency_signatures = slot(
            &manifest,
            repo_root,
            "dependency_signatures_v1",
            |path| DependencySignaturesPack::load(path),
            &mut load_errors,
        );
        store.mulligan_assumptions = slot(
            &manifest,
            repo_root,
            "mulligan_assumptions_v1",
            |path| MulliganAssumptionsPack::load(path),
            &mut load_errors,
        );
        store.bucket_substitutions = slot(
            &manifest,
            repo_root,
            "bucket_substitutions_v1",
            |path| BucketSubstitutionsPack::load(path),
            &mut load_errors,
        );
        store.weight_rules = slot(
            &manifest,
            repo_root,
            "weight_rules_v1",
            |path| WeightRulesPack::load(path),
            &mut load_errors,
        );
        store.stress_models = slot(
            &manifest,
            repo_root,
            "stress_models_v1",
            |path| StressModelsPack::load(path),
            &mut load_errors,
        );
        store.stress_operator_policy = slot(
            &manifest,
            repo_root,
            "stress_operator_policy_v1",
            |path| StressOperatorPolicyPack::load(path),
            &mut load_errors,
        );
        store.profile_thresholds = slot(
            &manifest,
            repo_root,
            "profile_thresholds_v1",
            |path| ProfileThresholdsPack::load(path),
            &mut load_errors,
        );
        store.required_effects = slot(
            &manifest,
            repo_root,
            "required_effects_v1",
            |path| RequiredEffectsPack::load(path),
            &mut load_errors,
        );

        // Combo catalog: v2 primary, legacy v1 only when v2 is missing
        // from the manifest entirely.
        let v2_path = manifest.resolve_pack_file_path(repo_root, "two_card_combos_v2", None);
        let v1_path = manifest.resolve_pack_file_path(repo_root, "two_card_combos_v1", None);
        store.combo_catalog = match (v2_path, v1_path) {
            (Ok(v2), _) => match super::read_pack_json("TWO_CARD_COMBOS_V2", &v2)
                .and_then(|document| ComboCatalog::parse_v2(&document))
            {
                Ok(catalog) => Some(catalog),
                Err(error) => {
                    load_errors.push(error.code());
                    None
                }
            },
            (Err(_), Ok(v1)) => match super::read_pack_json("TWO_CARD_COMBOS_V1", &v1)
                .and_then(|document| ComboCatalog::parse_v1(&document))
            {
                Ok(catalog) => Some(catalog),
                Err(error) => {
                    load_errors.push(error.code());
                    None
                }
            },
            (Err(error), Err(_)) => {
                load_errors.push(format!("TWO_CARD_COMBOS_V2_{}", suffix_of(&error)));
                None
            }
        };

        load_errors.sort();
        load_errors.dedup();
        store.load_errors = load_errors;
        Ok(store)
    }
}

fn suffix_of(error: &ManifestError) -> &'static str {
    match error {
        ManifestError::PackNotFound { .. } | ManifestError::FileMissing { .. } => "MISSING",
        _ => "UNAVAILABLE",
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::sha256_hex_bytes;
    use serde_json::{json, Value};

    fn write_pack(root: &Path, name: &str, document: &Value) -> (String, String) {
        let rel = format!("packs/{name}.json");
        let text = serde_json::to_string(document).unwrap();
        let absolute = root.join(&rel);
        std::fs::create_dir_all(absolute.parent().unwrap()).unwrap();
        std::fs::write(&absolute, &text).unwrap();
        (rel, sha256_hex_bytes(text.as_bytes()))
    }

    fn manifest_entry(pack_id: &str, rel: &str, sha256: &str, load_order: u32) -> Value {
        json!({
            "pack_id": pack_id,
            "pack_version": pack_id,
            "path": rel,
            "sha256": sha256,
            "load_order": load_order,
        })
    }

    #[test]
    fn loads_available_packs_and_records_missing_ones() {
        let root = std::env::temp_dir().join("sufficiency-pack-store-test");
        std::fs::remove_dir_all(&root).ok();
        std::fs::create_dir_all(&root).unwrap();

        let (signatures_rel, signatures_sha) = write_pack(
            &root,
            "dependency_signatures_v1",
            &json!({
                "version": "dependency_signatures_v1",
                "signatures": {"ramp_engine": {"any_required_primitives": ["RAMP"]}}
            }),
        );

        let manifest = json!({
            "version": "curated_pack_manifest_v1",
            "packs": [manifest_entry("dependency_signatures_v1", &signatures_rel, &signatures_sha, 0)]
        });
        std::fs::write(
            root.join(MANIFEST_FILE_NAME),
            serde_json::to_string(&manifest).unwrap(),
        )
        .unwrap();

        let store = PackStore::load(&root).unwrap();
        assert!(store.dependency_signatures.is_some());
        assert!(store.mulligan_assumptions.is_none());
        assert!(store
            .load_errors
            .contains(&"CURATED_PACK_MANIFEST_V1_PACK_NOT_FOUND".to_string()));

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn hash_mismatch_is_a_hard_error() {
        let root = std::env::temp_dir().join("sufficiency-pack-store-mismatch-test");
        std::fs::remove_dir_all(&root).ok();
        std::fs::create_dir_all(&root).unwrap();

        let (rel, _) = write_pack(
            &root,
            "dependency_signatures_v1",
            &json!({"version": "dependency_signatures_v1", "signatures": {}}),
        );
        let manifest = json!({
            "version": "curated_pack_manifest_v1",
            "packs": [manifest_entry("dependency_signatures_v1", &rel, &"0".repeat(64), 0)]
        });
        std::fs::write(
            root.join(MANIFEST_FILE_NAME),
            serde_json::to_string(&manifest).unwrap(),
        )
        .unwrap();

        let error = PackStore::load(&root).unwrap_err();
        assert_eq!(error.code(), "CURATED_PACK_MANIFEST_V1_SHA256_MISMATCH");

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn empty_store_has_no_packs() {
        let store = PackStore::empty();
        assert!(store.bucket_substitutions.is_none());
        assert!(store.load_errors.is_empty());
    }
}
