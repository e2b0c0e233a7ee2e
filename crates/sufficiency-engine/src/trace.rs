//! Structured build log entries.
//!
//! The pipeline emits one deterministic log row per layer instead of
//! free-form text: rows are plain serialized data keyed by a caller-supplied
//! trace id, so two identical builds log identically.

use serde::{Deserialize, Serialize};

use crate::status::LayerStatus;

/// One structured log row for a completed layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildLogEntry {
    /// Caller-supplied correlation id.
    pub trace_id: String,
    /// Layer name as it appears in the result envelope.
    pub layer: String,
    /// Compiled layer version pin.
    pub layer_version: String,
    /// Layer verdict.
    pub status: LayerStatus,
    /// SKIP reason, when the layer skipped.
    pub reason_code: Option<String>,
    /// Number of codes the layer emitted.
    pub codes_total: u64,
}

impl BuildLogEntry {
    pub fn new(
        trace_id: &str,
        layer: &str,
        layer_version: &str,
        status: LayerStatus,
        reason_code: Option<&str>,
        codes_total: usize,
    ) -> BuildLogEntry {
        BuildLogEntry {
            trace_id: trace_id.to_string(),
            layer: layer.to_string(),
            layer_version: layer_version.to_string(),
            status,
            reason_code: reason_code.map(str::to_string),
            codes_total: codes_total as u64,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
