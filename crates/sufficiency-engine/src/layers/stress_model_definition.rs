//! Stress model definition: select one operator sequence for the request.
//!
//! Selection precedence, first match wins: explicit request override (an
//! unknown override WARNs and falls through), exact profile/bracket pair,
//! profile, bracket, format default. Output operators are in canonical
//! `(op, parameter-tuple)` order, never data-file order.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::norm::sorted_codes;
use crate::packs::stress_models::{FormatStressModels, Operator, StressModelsPack};
use crate::status::LayerStatus;

pub const STRESS_MODEL_DEFINITION_VERSION: &str = "stress_model_definition_v1";

const ERROR_CODES: [&str; 1] = ["STRESS_MODEL_SELECTED_ID_INVALID"];

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// How the stress model was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StressSelectionSource {
    #[serde(rename = "override")]
    Override,
    #[serde(rename = "profile_bracket")]
    ProfileBracket,
    #[serde(rename = "profile")]
    Profile,
    #[serde(rename = "bracket")]
    Bracket,
    #[serde(rename = "default")]
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressModelDefinitionPayload {
    pub version: String,
    pub status: LayerStatus,
    pub reason_code: Option<String>,
    pub codes: Vec<String>,
    pub stress_models_version: Option<String>,
    pub format: String,
    pub profile_id: String,
    pub bracket_id: String,
    pub request_override_model_id: Option<String>,
    pub selected_model_id: Option<String>,
    pub selection_source: Option<StressSelectionSource>,
    pub operators: Vec<Operator>,
}

impl StressModelDefinitionPayload {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

struct PayloadParts<'a> {
    stress_models_version: Option<String>,
    format: &'a str,
    profile_id: &'a str,
    bracket_id: &'a str,
    request_override_model_id: Option<String>,
}

impl PayloadParts<'_> {
    fn build(
        self,
        status: LayerStatus,
        reason_code: Option<&str>,
        codes: Vec<String>,
        selected_model_id: Option<String>,
        selection_source: Option<StressSelectionSource>,
        operators: Vec<Operator>,
    ) -> StressModelDefinitionPayload {
        StressModelDefinitionPayload {
            version: STRESS_MODEL_DEFINITION_VERSION.to_string(),
            status,
            reason_code: reason_code.map(str::to_string),
            codes,
            stress_models_version: self.stress_models_version,
            format: self.format.to_string(),
            profile_id: self.profile_id.to_string(),
            bracket_id: self.bracket_id.to_string(),
            request_override_model_id: self.request_override_model_id,
            selected_model_id,
            selection_source,
            operators,
        }
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

fn resolve_selected_model(
    entry: &FormatStressModels,
    profile_id: &str,
    bracket_id: &str,
    request_override: Option<&str>,
    codes: &mut BTreeSet<String>,
) -> Option<(String, StressSelectionSource)> {
    if let Some(override_id) = request_override {
        if entry.models.contains_key(override_id) {
            return Some((override_id.to_string(), StressSelectionSource::Override));
        }
        codes.insert("STRESS_MODEL_OVERRIDE_UNKNOWN".to_string());
    }

    for row in &entry.selection.by_profile_bracket {
        if row.profile_id == profile_id && row.bracket_id == bracket_id {
            return Some((row.model_id.clone(), StressSelectionSource::ProfileBracket));
        }
    }

    if let Some(model_id) = entry.selection.by_profile_id.get(profile_id) {
        return Some((model_id.clone(), StressSelectionSource::Profile));
    }

    if let Some(model_id) = entry.selection.by_bracket_id.get(bracket_id) {
        return Some((model_id.clone(), StressSelectionSource::Bracket));
    }

    entry
        .selection
        .default_model_id
        .as_ref()
        .map(|model_id| (model_id.clone(), StressSelectionSource::Default))
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Select and canonicalize the stress model for one request.
pub fn run_stress_model_definition(
    format: &str,
    profile_id: &str,
    bracket_id: &str,
    request_override_model_id: Option<&str>,
    stress_models: Option<&StressModelsPack>,
) -> StressModelDefinitionPayload {
    let format_token = format.trim();
    let profile_token = profile_id.trim();
    let bracket_token = bracket_id.trim();
    let override_token = request_override_model_id
        .map(str::trim)
        .filter(|token| !token.is_empty());

    let parts = PayloadParts {
        stress_models_version: stress_models.map(|pack| pack.version.clone()),
        format: format_token,
        profile_id: profile_token,
        bracket_id: bracket_token,
        request_override_model_id: override_token.map(str::to_string),
    };

    let Some(stress_models) = stress_models else {
        return parts.build(
            LayerStatus::Skip,
            Some("STRESS_MODELS_UNAVAILABLE"),
            Vec::new(),
            None,
            None,
            Vec::new(),
        );
    };

    let Some(entry) = stress_models.format_entry(format_token) else {
        return parts.build(
            LayerStatus::Skip,
            Some("FORMAT_STRESS_MODELING_UNAVAILABLE"),
            Vec::new(),
            None,
            None,
            Vec::new(),
        );
    };

    let mut codes: BTreeSet<String> = BTreeSet::new();
    let selected = resolve_selected_model(
        entry,
        profile_token,
        bracket_token,
        override_token,
        &mut codes,
    );

    let Some((selected_model_id, selection_source)) = selected else {
        return parts.build(
            LayerStatus::Skip,
            Some("STRESS_MODEL_SELECTION_UNAVAILABLE"),
            sorted_codes(&codes),
            None,
            None,
            Vec::new(),
        );
    };

    let Some(model) = entry.models.get(&selected_model_id) else {
        codes.insert("STRESS_MODEL_SELECTED_ID_INVALID".to_string());
        return parts.build(
            LayerStatus::Error,
            None,
            sorted_codes(&codes),
            Some(selected_model_id),
            Some(selection_source),
            Vec::new(),
        );
    };

    // Canonical order: op name ascending, then parameter tuple ascending
    // via the canonical JSON form.
    let mut operators = model.operators.clone();
    operators.sort_by(|a, b| {
        (a.op_name(), a.canonical_json()).cmp(&(b.op_name(), b.canonical_json()))
    });

    let codes_sorted = sorted_codes(&codes);
    let status = if codes_sorted.iter().any(|c| ERROR_CODES.contains(&c.as_str())) {
        LayerStatus::Error
    } else if codes_sorted.is_empty() {
        LayerStatus::Ok
    } else {
        LayerStatus::Warn
    };

    parts.build(
        status,
        None,
        codes_sorted,
        Some(selected_model_id),
        Some(selection_source),
        operators,
    )
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pack() -> StressModelsPack {
        StressModelsPack::parse(&json!({
            "version": "stress_models_v1",
            "format_defaults": {
                "commander": {
                    "selection": {
                        "default_model_id": "baseline",
                        "by_profile_id": {"focused": "focused_meta"},
                        "by_bracket_id": {"B4": "cutthroat"},
                        "by_profile_bracket": [
                            {"profile_id": "focused", "bracket_id": "B4", "model_id": "apex"}
                        ]
                    },
                    "models": {
                        "baseline": {
                            "operators": [
                                {"op": "STAX_TAX", "by_turn": 3, "inflation_factor": 0.9},
                                {"op": "BOARD_WIPE", "by_turn": 6, "surviving_engine_fraction": 0.5},
                                {"op": "BOARD_WIPE", "by_turn": 5, "surviving_engine_fraction": 0.4}
                            ]
                        },
                        "focused_meta": {"operators": []},
                        "cutthroat": {"operators": []},
                        "apex": {"operators": []},
                        "ghost": {"operators": []}
                    }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn missing_pack_skips() {
        let payload = run_stress_model_definition("commander", "focused", "B2", None, None);
        assert_eq!(payload.status, LayerStatus::Skip);
        assert_eq!(
            payload.reason_code.as_deref(),
            Some("STRESS_MODELS_UNAVAILABLE")
        );
    }

    #[test]
    fn precedence_profile_bracket_beats_profile_and_bracket() {
        let pack = pack();
        let payload = run_stress_model_definition("commander", "focused", "B4", None, Some(&pack));
        assert_eq!(payload.selected_model_id.as_deref(), Some("apex"));
        assert_eq!(
            payload.selection_source,
            Some(StressSelectionSource::ProfileBracket)
        );
    }

    #[test]
    fn precedence_profile_then_bracket_then_default() {
        let pack = pack();
        let by_profile =
            run_stress_model_definition("commander", "focused", "B2", None, Some(&pack));
        assert_eq!(by_profile.selected_model_id.as_deref(), Some("focused_meta"));
        assert_eq!(
            by_profile.selection_source,
            Some(StressSelectionSource::Profile)
        );

        let by_bracket =
            run_stress_model_definition("commander", "casual", "B4", None, Some(&pack));
        assert_eq!(by_bracket.selected_model_id.as_deref(), Some("cutthroat"));
        assert_eq!(
            by_bracket.selection_source,
            Some(StressSelectionSource::Bracket)
        );

        let by_default =
            run_stress_model_definition("commander", "casual", "B2", None, Some(&pack));
        assert_eq!(by_default.selected_model_id.as_deref(), Some("baseline"));
        assert_eq!(
            by_default.selection_source,
            Some(StressSelectionSource::Default)
        );
    }

    #[test]
    fn override_wins_when_known() {
        let pack = pack();
        let payload =
            run_stress_model_definition("commander", "focused", "B4", Some("ghost"), Some(&pack));
        assert_eq!(payload.selected_model_id.as_deref(), Some("ghost"));
        assert_eq!(
            payload.selection_source,
            Some(StressSelectionSource::Override)
        );
        assert_eq!(payload.status, LayerStatus::Ok);
    }

    #[test]
    fn unknown_override_warns_and_falls_through() {
        let pack = pack();
        let payload = run_stress_model_definition(
            "commander",
            "casual",
            "B2",
            Some("does_not_exist"),
            Some(&pack),
        );
        assert_eq!(payload.status, LayerStatus::Warn);
        assert_eq!(payload.codes, ["STRESS_MODEL_OVERRIDE_UNKNOWN"]);
        assert_eq!(payload.selected_model_id.as_deref(), Some("baseline"));
        assert_eq!(
            payload.selection_source,
            Some(StressSelectionSource::Default)
        );
    }

    #[test]
    fn operators_sorted_by_op_then_parameters() {
        let pack = pack();
        let payload =
            run_stress_model_definition("commander", "casual", "B2", None, Some(&pack));
        let names: Vec<&str> = payload.operators.iter().map(|op| op.op_name()).collect();
        assert_eq!(names, ["BOARD_WIPE", "BOARD_WIPE", "STAX_TAX"]);
        // Parameter tuple ascending: by_turn 5 sorts before by_turn 6.
        match &payload.operators[0] {
            Operator::BoardWipe { by_turn, .. } => assert_eq!(*by_turn, 5),
            other => panic!("unexpected operator {other:?}"),
        }
    }

    #[test]
    fn unknown_format_skips() {
        let pack = pack();
        let payload = run_stress_model_definition("modern", "focused", "B2", None, Some(&pack));
        assert_eq!(
            payload.reason_code.as_deref(),
            Some("FORMAT_STRESS_MODELING_UNAVAILABLE")
        );
    }
}
