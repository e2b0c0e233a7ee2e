//! Curated pack manifest.
//!
//! The manifest is the only path from a pack id to bytes on disk: every
//! entry pins a normalized repo-relative path and a 64-hex lowercase
//! SHA-256, and an on-disk mismatch is a hard error. Resolution is stable:
//! candidates sort under `(load_order, pack_id, pack_version, path, sha256,
//! created_by)` and the lexicographically-last one wins.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::sha256_hex_bytes;

/// Version pin for the manifest document itself.
pub const CURATED_PACK_MANIFEST_VERSION: &str = "curated_pack_manifest_v1";

// ---------------------------------------------------------------------------
// ManifestError
// ---------------------------------------------------------------------------

/// Manifest failure classes with stable codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestError {
    Missing { detail: String },
    InvalidJson { detail: String },
    Invalid { detail: String },
    DuplicateEntry { detail: String },
    PackNotFound { detail: String },
    FileMissing { detail: String },
    Sha256Mismatch { detail: String },
    InvalidQuery { detail: String },
}

impl ManifestError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Missing { .. } => "CURATED_PACK_MANIFEST_V1_MISSING",
            Self::InvalidJson { .. } => "CURATED_PACK_MANIFEST_V1_INVALID_JSON",
            Self::Invalid { .. } => "CURATED_PACK_MANIFEST_V1_INVALID",
            Self::DuplicateEntry { .. } => "CURATED_PACK_MANIFEST_V1_DUPLICATE_ENTRY",
            Self::PackNotFound { .. } => "CURATED_PACK_MANIFEST_V1_PACK_NOT_FOUND",
            Self::FileMissing { .. } => "CURATED_PACK_MANIFEST_V1_FILE_MISSING",
            Self::Sha256Mismatch { .. } => "CURATED_PACK_MANIFEST_V1_SHA256_MISMATCH",
            Self::InvalidQuery { .. } => "CURATED_PACK_MANIFEST_V1_INVALID_QUERY",
        }
    }

    fn detail(&self) -> &str {
        match self {
            Self::Missing { detail }
            | Self::InvalidJson { detail }
            | Self::Invalid { detail }
            | Self::DuplicateEntry { detail }
            | Self::PackNotFound { detail }
            | Self::FileMissing { detail }
            | Self::Sha256Mismatch { detail }
            | Self::InvalidQuery { detail } => detail,
        }
    }
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.detail())
    }
}

impl std::error::Error for ManifestError {}

fn invalid(detail: String) -> ManifestError {
    ManifestError::Invalid { detail }
}

// ---------------------------------------------------------------------------
// ManifestEntry
// ---------------------------------------------------------------------------

/// One pack pin.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub load_order: u32,
    pub pack_id: String,
    pub pack_version: String,
    /// Normalized repo-relative path (forward slashes, no `.`/`..`).
    pub path: String,
    /// 64-hex lowercase SHA-256 of the file bytes.
    pub sha256: String,
    pub created_by: Option<String>,
}

impl ManifestEntry {
    /// Stable resolve/sort key.
    fn sort_key(&self) -> (u32, &str, &str, &str, &str, &str) {
        (
            self.load_order,
            &self.pack_id,
            &self.pack_version,
            &self.path,
            &self.sha256,
            self.created_by.as_deref().unwrap_or(""),
        )
    }
}

/// Reject absolute paths, drive prefixes, and traversal segments; normalize
/// separators and drop empty / `.` segments.
fn normalize_rel_path(raw: &str) -> Result<String, ManifestError> {
    let cleaned = raw.trim().replace('\\', "/");
    let reject = || invalid(format!("path must be a normalized repo-relative path: {raw}"));
    if cleaned.starts_with('/') {
        return Err(reject());
    }
    let bytes = cleaned.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(reject());
    }
    let segments: Vec<&str> = cleaned
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();
    if segments.is_empty() || segments.iter().any(|segment| *segment == "..") {
        return Err(reject());
    }
    Ok(segments.join("/"))
}

fn nonempty(value: Option<&Value>, field: &str) -> Result<String, ManifestError> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| invalid(format!("{field} must be a non-empty string")))
}

fn normalize_entry(raw: &Value, index: usize) -> Result<ManifestEntry, ManifestError> {
    let object = raw
        .as_object()
        .ok_or_else(|| invalid(format!("packs[{index}] must be an object")))?;

    let pack_id = nonempty(object.get("pack_id"), &format!("packs[{index}].pack_id"))?;
    let pack_version = nonempty(
        object.get("pack_version"),
        &format!("packs[{index}].pack_version"),
    )?;
    let path_raw = nonempty(object.get("path"), &format!("packs[{index}].path"))?;

    let sha256 = nonempty(object.get("sha256"), &format!("packs[{index}].sha256"))?.to_lowercase();
    if sha256.len() != 64 || !sha256.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
    {
        return Err(invalid(format!(
            "packs[{index}].sha256 must be a 64-char hex string"
        )));
    }

    let load_order = object
        .get("load_order")
        .and_then(Value::as_u64)
        .and_then(|raw| u32::try_from(raw).ok())
        .ok_or_else(|| {
            invalid(format!(
                "packs[{index}].load_order must be a non-negative integer"
            ))
        })?;

    let created_by = object
        .get("created_by")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string);

    Ok(ManifestEntry {
        load_order,
        pack_id,
        pack_version,
        path: normalize_rel_path(&path_raw)?,
        sha256,
        created_by,
    })
}

// ---------------------------------------------------------------------------
// PackManifest
// ---------------------------------------------------------------------------

/// Parsed, normalized manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackManifest {
    pub version: String,
    /// Entries in stable sort-key order.
    pub packs: Vec<ManifestEntry>,
}

impl PackManifest {
    /// Parse and normalize a manifest document.
    pub fn parse(document: &Value) -> Result<PackManifest, ManifestError> {
        let object = document
            .as_object()
            .ok_or_else(|| invalid("root must be an object".to_string()))?;

        let version = nonempty(object.get("version"), "version")?;
        if version != CURATED_PACK_MANIFEST_VERSION {
            return Err(invalid(format!(
                "version must equal '{CURATED_PACK_MANIFEST_VERSION}'"
            )));
        }

        let packs_raw = object
            .get("packs")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("packs must be a list".to_string()))?;

        let mut packs: Vec<ManifestEntry> = packs_raw
            .iter()
            .enumerate()
            .map(|(index, raw)| normalize_entry(raw, index))
            .collect::<Result<_, _>>()?;
        packs.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
        for entry in &packs {
            let key = (entry.pack_id.clone(), entry.pack_version.clone());
            if !seen.insert(key) {
                return Err(ManifestError::DuplicateEntry {
                    detail: format!("duplicate entry for {}@{}", entry.pack_id, entry.pack_version),
                });
            }
        }

        Ok(PackManifest { version, packs })
    }

    /// Load a manifest file.
    pub fn load(path: &Path) -> Result<PackManifest, ManifestError> {
        if !path.is_file() {
            return Err(ManifestError::Missing {
                detail: path.display().to_string(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|_| ManifestError::InvalidJson {
            detail: path.display().to_string(),
        })?;
        let document: Value = serde_json::from_str(&text).map_err(|_| ManifestError::InvalidJson {
            detail: path.display().to_string(),
        })?;
        Self::parse(&document)
    }

    /// Resolve a pack id (optionally pinned to a version) to its entry.
    ///
    /// The lexicographically-last candidate under the stable sort key wins.
    pub fn resolve_pack_entry(
        &self,
        pack_id: &str,
        pack_version: Option<&str>,
    ) -> Result<&ManifestEntry, ManifestError> {
        let pack_id = pack_id.trim();
        if pack_id.is_empty() {
            return Err(ManifestError::InvalidQuery {
                detail: "pack_id must be a non-empty string".to_string(),
            });
        }
        let version = pack_version.map(str::trim).filter(|token| !token.is_empty());

        let selected = self
            .packs
            .iter()
            .filter(|entry| entry.pack_id == pack_id)
            .filter(|entry| version.map_or(true, |v| entry.pack_version == v))
            .last();

        selected.ok_or_else(|| {
            let requested = match version {
                Some(v) => format!("{pack_id}@{v}"),
                None => pack_id.to_string(),
            };
            ManifestError::PackNotFound { detail: requested }
        })
    }

    /// Resolve a pack to an absolute file path under `repo_root`.
    pub fn resolve_pack_file_path(
        &self,
        repo_root: &Path,
        pack_id: &str,
        pack_version: Option<&str>,
    ) -> Result<PathBuf, ManifestError> {
        let entry = self.resolve_pack_entry(pack_id, pack_version)?;
        let absolute = repo_root.join(&entry.path);
        if !absolute.is_file() {
            return Err(ManifestError::FileMissing {
                detail: entry.path.clone(),
            });
        }
        Ok(absolute)
    }

    /// Validate every entry's on-disk SHA-256. Mismatch is a hard error.
    pub fn validate_hashes(&self, repo_root: &Path) -> Result<(), ManifestError> {
        for entry in &self.packs {
            let absolute = repo_root.join(&entry.path);
            if !absolute.is_file() {
                return Err(ManifestError::FileMissing {
                    detail: entry.path.clone(),
                });
            }
            let bytes = std::fs::read(&absolute).map_err(|_| ManifestError::FileMissing {
                detail: entry.path.clone(),
            })?;
            let actual = sha256_hex_bytes(&bytes);
            if actual != entry.sha256 {
                return Err(ManifestError::Sha256Mismatch {
                    detail: format!(
                        "{} expected={} actual={}",
                        entry.path, entry.sha256, actual
                    ),
                });
            }
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
