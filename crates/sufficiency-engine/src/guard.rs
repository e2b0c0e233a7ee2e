//! Fail-closed runtime mode guard.
//!
//! Runs before any layer: rejects requests that would enable a text-parsing
//! path and requests whose snapshot has no compiled tags. Violations are a
//! hard stop, never a degraded build.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::request::BuildRequest;

// ---------------------------------------------------------------------------
// GuardError
// ---------------------------------------------------------------------------

/// Guard rejection with the sorted list of violated flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardError {
    /// One or more text-parsing escape hatches were enabled.
    SafeModeViolation { flags: Vec<String> },
    /// Compiled tags for the snapshot are unavailable.
    TagsNotCompiled { db_snapshot_id: String },
}

impl GuardError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SafeModeViolation { .. } => "RUNTIME_SAFE_MODE_VIOLATION",
            Self::TagsNotCompiled { .. } => "TAGS_NOT_COMPILED",
        }
    }
}

impl fmt::Display for GuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SafeModeViolation { flags } => {
                write!(f, "{}: {}", self.code(), flags.join(","))
            }
            Self::TagsNotCompiled { db_snapshot_id } => {
                write!(f, "{}: {db_snapshot_id}", self.code())
            }
        }
    }
}

impl std::error::Error for GuardError {}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// Validate a request against the runtime safety policy.
pub fn assert_runtime_safe_mode(request: &BuildRequest) -> Result<(), GuardError> {
    let mut violations: Vec<String> = Vec::new();
    if request.enable_proof {
        violations.push("ENGINE_ENABLE_PROOF".to_string());
    }
    if request.enable_oracle_runtime {
        violations.push("ENGINE_ENABLE_ORACLE_RUNTIME".to_string());
    }
    if request.allow_runtime_oracle_text {
        violations.push("ENGINE_ALLOW_RUNTIME_ORACLE_TEXT".to_string());
    }
    if !violations.is_empty() {
        violations.sort();
        violations.dedup();
        return Err(GuardError::SafeModeViolation { flags: violations });
    }

    if !request.tags_compiled {
        return Err(GuardError::TagsNotCompiled {
            db_snapshot_id: request.db_snapshot_id.clone(),
        });
    }

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BuildRequest {
        BuildRequest::new("snap-1", "commander", "focused", "B2")
    }

    #[test]
    fn clean_request_passes() {
        assert!(assert_runtime_safe_mode(&request()).is_ok());
    }

    #[test]
    fn text_parsing_flags_are_rejected_sorted() {
        let mut bad = request();
        bad.allow_runtime_oracle_text = true;
        bad.enable_proof = true;
        let err = assert_runtime_safe_mode(&bad).unwrap_err();
        match err {
            GuardError::SafeModeViolation { flags } => {
                assert_eq!(
                    flags,
                    vec!["ENGINE_ALLOW_RUNTIME_ORACLE_TEXT", "ENGINE_ENABLE_PROOF"]
                );
            }
            other => panic!("unexpected guard error: {other}"),
        }
    }

    #[test]
    fn uncompiled_tags_fail_closed() {
        let mut bad = request();
        bad.tags_compiled = false;
        let err = assert_runtime_safe_mode(&bad).unwrap_err();
        assert_eq!(err.code(), "TAGS_NOT_COMPILED");
    }

    #[test]
    fn safe_mode_wins_over_tags_check() {
        let mut bad = request();
        bad.enable_proof = true;
        bad.tags_compiled = false;
        let err = assert_runtime_safe_mode(&bad).unwrap_err();
        assert_eq!(err.code(), "RUNTIME_SAFE_MODE_VIOLATION");
    }
}
