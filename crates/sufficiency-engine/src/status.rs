//! Closed verdict vocabularies.
//!
//! Layers use `{OK, WARN, SKIP, ERROR}`; the sufficiency summary alone uses
//! `{PASS, WARN, FAIL, SKIP}`. Both are closed sums: consumers match
//! exhaustively, and adding a variant is a pipeline-version bump.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// LayerStatus
// ---------------------------------------------------------------------------

/// Per-layer verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LayerStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "SKIP")]
    Skip,
    #[serde(rename = "ERROR")]
    Error,
}

impl LayerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warn => "WARN",
            Self::Skip => "SKIP",
            Self::Error => "ERROR",
        }
    }

    /// Whether downstream layers may consume this payload.
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ok | Self::Warn)
    }
}

impl fmt::Display for LayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SummaryStatus
// ---------------------------------------------------------------------------

/// Aggregate sufficiency verdict. Severity order: SKIP > FAIL > WARN > PASS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SummaryStatus {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "SKIP")]
    Skip,
}

impl SummaryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Warn => "WARN",
            Self::Fail => "FAIL",
            Self::Skip => "SKIP",
        }
    }
}

impl fmt::Display for SummaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_status_serde_renames() {
        assert_eq!(serde_json::to_string(&LayerStatus::Ok).unwrap(), "\"OK\"");
        assert_eq!(
            serde_json::to_string(&LayerStatus::Error).unwrap(),
            "\"ERROR\""
        );
        let parsed: LayerStatus = serde_json::from_str("\"SKIP\"").unwrap();
        assert_eq!(parsed, LayerStatus::Skip);
    }

    #[test]
    fn readiness_gate() {
        assert!(LayerStatus::Ok.is_ready());
        assert!(LayerStatus::Warn.is_ready());
        assert!(!LayerStatus::Skip.is_ready());
        assert!(!LayerStatus::Error.is_ready());
    }

    #[test]
    fn summary_severity_order() {
        assert!(SummaryStatus::Skip > SummaryStatus::Fail);
        assert!(SummaryStatus::Fail > SummaryStatus::Warn);
        assert!(SummaryStatus::Warn > SummaryStatus::Pass);
    }
}
