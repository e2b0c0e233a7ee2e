//! Build request: the complete runtime-recognized configuration surface.
//!
//! Everything else the pipeline does is derived from the data packs; there
//! are no feature flags that alter numeric output.

use serde::{Deserialize, Serialize};

/// One sufficiency build request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Frozen reference-data snapshot this build reads against.
    pub db_snapshot_id: String,
    /// Format identifier used to select `format_defaults` pack sections.
    pub format: String,
    /// Requested thresholds profile.
    pub profile_id: String,
    /// Requested bracket.
    pub bracket_id: String,
    /// Optional explicit stress-model override (highest selection
    /// precedence; unknown ids fall through with a WARN).
    pub request_override_model_id: Option<String>,
    /// Optional commander slot id within the primitive index.
    pub commander_slot_id: Option<String>,
    /// Whether compiled tags exist for the snapshot. False fails closed.
    pub tags_compiled: bool,
    /// Text-parsing escape hatches. All must be false at runtime.
    pub enable_proof: bool,
    pub enable_oracle_runtime: bool,
    pub allow_runtime_oracle_text: bool,
}

impl BuildRequest {
    /// A request with the fail-closed defaults: tags compiled, every
    /// text-parsing path disabled.
    pub fn new(
        db_snapshot_id: &str,
        format: &str,
        profile_id: &str,
        bracket_id: &str,
    ) -> BuildRequest {
        BuildRequest {
            db_snapshot_id: db_snapshot_id.to_string(),
            format: format.to_string(),
            profile_id: profile_id.to_string(),
            bracket_id: bracket_id.to_string(),
            request_override_model_id: None,
            commander_slot_id: None,
            tags_compiled: true,
            enable_proof: false,
            enable_oracle_runtime: false,
            allow_runtime_oracle_text: false,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
