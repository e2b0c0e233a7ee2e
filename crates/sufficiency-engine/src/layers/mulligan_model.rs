//! Mulligan model: per-policy effective draw counts at the checkpoints.
//!
//! Purely a projection of the assumptions pack: values are clamped to the
//! deck size and quantized; policies come out in ascending policy order
//! with the frozen checkpoint sequence.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fixed::Fixed6;
use crate::packs::mulligan_assumptions::{MulliganAssumptionsPack, MulliganPolicyId};
use crate::status::LayerStatus;
use crate::CHECKPOINTS;

pub const MULLIGAN_MODEL_VERSION: &str = "mulligan_model_v1";

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEffectiveN {
    pub checkpoint: u32,
    pub effective_n: Fixed6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEffectiveN {
    pub policy: MulliganPolicyId,
    pub effective_n_by_checkpoint: Vec<CheckpointEffectiveN>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MulliganModelPayload {
    pub version: String,
    pub status: LayerStatus,
    pub reason_code: Option<String>,
    pub codes: Vec<String>,
    pub assumptions_version: Option<String>,
    pub format: String,
    pub default_policy: Option<MulliganPolicyId>,
    pub checkpoints: Vec<u32>,
    pub policy_effective_n: Vec<PolicyEffectiveN>,
}

impl MulliganModelPayload {
    fn skip(
        reason_code: &str,
        assumptions_version: Option<String>,
        format: &str,
    ) -> MulliganModelPayload {
        MulliganModelPayload {
            version: MULLIGAN_MODEL_VERSION.to_string(),
            status: LayerStatus::Skip,
            reason_code: Some(reason_code.to_string()),
            codes: Vec::new(),
            assumptions_version,
            format: format.to_string(),
            default_policy: None,
            checkpoints: CHECKPOINTS.to_vec(),
            policy_effective_n: Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// The default policy's per-checkpoint draw counts, when available.
    pub fn default_policy_row(&self) -> Option<&PolicyEffectiveN> {
        let default_policy = self.default_policy?;
        self.policy_effective_n
            .iter()
            .find(|row| row.policy == default_policy)
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Project the mulligan assumptions for one format.
pub fn run_mulligan_model(
    format: &str,
    assumptions: Option<&MulliganAssumptionsPack>,
) -> MulliganModelPayload {
    let format_token = format.trim();

    let Some(assumptions) = assumptions else {
        return MulliganModelPayload::skip("MULLIGAN_ASSUMPTIONS_UNAVAILABLE", None, format_token);
    };

    let Some(format_entry) = assumptions.format_entry(format_token) else {
        return MulliganModelPayload::skip(
            "FORMAT_ASSUMPTIONS_UNAVAILABLE",
            Some(assumptions.version.clone()),
            format_token,
        );
    };

    let mut policy_effective_n = Vec::with_capacity(format_entry.policies.len());
    for (policy, payload) in &format_entry.policies {
        let rows = CHECKPOINTS
            .iter()
            .map(|checkpoint| {
                let raw = payload
                    .effective_n_by_checkpoint
                    .get(checkpoint)
                    .copied()
                    .unwrap_or(0.0);
                let effective_n = Fixed6::quantize_f64(raw)
                    .unwrap_or(Fixed6::ZERO)
                    .clamp_deck_size();
                CheckpointEffectiveN {
                    checkpoint: *checkpoint,
                    effective_n,
                }
            })
            .collect();
        policy_effective_n.push(PolicyEffectiveN {
            policy: *policy,
            effective_n_by_checkpoint: rows,
        });
    }

    MulliganModelPayload {
        version: MULLIGAN_MODEL_VERSION.to_string(),
        status: LayerStatus::Ok,
        reason_code: None,
        codes: Vec::new(),
        assumptions_version: Some(assumptions.version.clone()),
        format: format_token.to_string(),
        default_policy: Some(format_entry.default_policy),
        checkpoints: CHECKPOINTS.to_vec(),
        policy_effective_n,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
