//! The `xiaojing_review_v1` contract: reviewer verdicts on plans and
//! deliverables.

use crate::error::ValidatorError;
use crate::fields::{as_object, check_schema_version, opt_str, opt_str_array, req_int_range};
use crate::normalize::{
    alias_value, apply_aliases, coerce_integral, ensure_array, ensure_schema_version,
    filter_objects, peel_wrappers, uppercase_field,
};
use crate::REVIEW_SCHEMA_VERSION;
use planloom_core::{ActionRequired, ScoreBreakdown, Suggestion, SuggestionPriority};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The validated `xiaojing_review_v1` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResponse {
    /// Always [`REVIEW_SCHEMA_VERSION`].
    pub schema_version: String,
    /// Overall score in `[0, 100]`; advisory at the pass boundary.
    pub total_score: u32,
    /// The authoritative verdict.
    pub action_required: ActionRequired,
    /// Per-dimension scores.
    pub breakdown: Vec<ScoreBreakdown>,
    /// Rework suggestions.
    pub suggestions: Vec<Suggestion>,
    /// Free-text summary.
    pub summary: String,
}

/// Normalize an arbitrary model response toward the `xiaojing_review_v1`
/// shape. Scores and verdicts pass through untouched — only their spelling
/// and packaging are fixed.
pub fn normalize_review(raw: &Value) -> Value {
    let mut obj = match peel_wrappers(raw.clone(), &["total_score", "action_required", "score"]) {
        Value::Object(obj) => obj,
        other => return other,
    };

    apply_aliases(
        &mut obj,
        &[
            ("score", "total_score"),
            ("action", "action_required"),
            ("verdict", "action_required"),
            ("dimension_scores", "breakdown"),
            ("scores", "breakdown"),
            ("comment", "summary"),
        ],
    );
    uppercase_field(&mut obj, "action_required");
    alias_value(
        &mut obj,
        "action_required",
        &[("REQUEST_INPUT", "REQUEST_EXTERNAL_INPUT"), ("REJECT", "MODIFY")],
    );
    coerce_integral(&mut obj, "total_score");
    ensure_array(&mut obj, "breakdown");
    ensure_array(&mut obj, "suggestions");
    filter_objects(&mut obj, "breakdown");
    filter_objects(&mut obj, "suggestions");

    if let Some(Value::Array(breakdown)) = obj.get_mut("breakdown") {
        for item in breakdown.iter_mut() {
            if let Value::Object(b) = item {
                apply_aliases(b, &[("name", "dimension"), ("value", "score")]);
                coerce_integral(b, "score");
            }
        }
    }
    if let Some(Value::Array(suggestions)) = obj.get_mut("suggestions") {
        for item in suggestions.iter_mut() {
            if let Value::Object(s) = item {
                apply_aliases(
                    s,
                    &[
                        ("suggestion", "change"),
                        ("description", "change"),
                        ("acceptance", "acceptance_criteria"),
                    ],
                );
                uppercase_field(s, "priority");
                alias_value(s, "priority", &[("MEDIUM", "MED")]);
            }
        }
    }
    if !obj.contains_key("summary") {
        obj.insert("summary".to_string(), Value::String(String::new()));
    }

    ensure_schema_version(&mut obj, REVIEW_SCHEMA_VERSION);
    Value::Object(obj)
}

/// Strictly validate a normalized value against `xiaojing_review_v1`.
pub fn validate_review(value: &Value) -> Result<ReviewResponse, ValidatorError> {
    let obj = as_object(value, "$")?;
    check_schema_version(obj, REVIEW_SCHEMA_VERSION)?;

    let total_score = req_int_range(obj, "$", "total_score", 0, 100)? as u32;
    let raw_action = obj
        .get("action_required")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let action_required = ActionRequired::parse(raw_action).ok_or_else(|| {
        ValidatorError::new(
            "$.action_required",
            "one of APPROVE | MODIFY | REQUEST_EXTERNAL_INPUT",
            r#"{"action_required": "APPROVE"}"#,
        )
    })?;

    let mut breakdown = Vec::new();
    if let Some(items) = obj.get("breakdown").and_then(Value::as_array) {
        for (i, raw) in items.iter().enumerate() {
            let path = format!("$.breakdown[{i}]");
            let b = as_object(raw, &path)?;
            breakdown.push(ScoreBreakdown {
                dimension: crate::fields::req_str(b, &path, "dimension")?,
                score: req_int_range(b, &path, "score", 0, 100)? as u32,
            });
        }
    }

    let mut suggestions = Vec::new();
    if let Some(items) = obj.get("suggestions").and_then(Value::as_array) {
        for (i, raw) in items.iter().enumerate() {
            let path = format!("$.suggestions[{i}]");
            let s = as_object(raw, &path)?;
            let raw_priority = s.get("priority").and_then(Value::as_str).unwrap_or_default();
            let priority = SuggestionPriority::parse(raw_priority).ok_or_else(|| {
                ValidatorError::new(
                    format!("{path}.priority"),
                    "one of HIGH | MED | LOW",
                    r#"{"priority": "HIGH"}"#,
                )
            })?;
            suggestions.push(Suggestion {
                priority,
                change: crate::fields::req_str(s, &path, "change")?,
                steps: opt_str_array(s, &path, "steps")?,
                acceptance_criteria: opt_str(s, &path, "acceptance_criteria")?,
            });
        }
    }

    let summary = opt_str(obj, "$", "summary")?.unwrap_or_default();

    Ok(ReviewResponse {
        schema_version: REVIEW_SCHEMA_VERSION.to_string(),
        total_score,
        action_required,
        breakdown,
        suggestions,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_approve_validates() {
        let raw = json!({
            "total_score": 95,
            "action_required": "APPROVE",
            "summary": "ship it",
        });
        let review = validate_review(&normalize_review(&raw)).unwrap();
        assert_eq!(review.total_score, 95);
        assert_eq!(review.action_required, ActionRequired::Approve);
        assert_eq!(review.summary, "ship it");
    }

    #[test]
    fn test_wrapped_and_aliased_review() {
        let raw = json!({
            "review_result": {
                "score": 70.0,
                "action": "modify",
                "dimension_scores": [
                    {"name": "completeness", "value": 60},
                    {"name": "polish", "value": 80},
                ],
                "suggestions": [
                    {"priority": "medium", "suggestion": "add game-over screen"},
                ],
            }
        });
        let review = validate_review(&normalize_review(&raw)).unwrap();
        assert_eq!(review.total_score, 70);
        assert_eq!(review.action_required, ActionRequired::Modify);
        assert_eq!(review.breakdown.len(), 2);
        assert_eq!(review.breakdown[0].dimension, "completeness");
        assert_eq!(review.suggestions[0].priority, SuggestionPriority::Med);
        assert_eq!(review.suggestions[0].change, "add game-over screen");
    }

    #[test]
    fn test_score_out_of_range_rejected() {
        let raw = json!({"total_score": 120, "action_required": "APPROVE"});
        let err = validate_review(&normalize_review(&raw)).unwrap_err();
        assert_eq!(err.path, "$.total_score");
        assert!(err.expected.contains("[0, 100]"));
    }

    #[test]
    fn test_fractional_score_rejected_not_rounded() {
        // 87.5 is semantic content; normalization must not round it.
        let raw = json!({"total_score": 87.5, "action_required": "APPROVE"});
        let err = validate_review(&normalize_review(&raw)).unwrap_err();
        assert_eq!(err.path, "$.total_score");
    }

    #[test]
    fn test_unknown_action_rejected_with_set() {
        let raw = json!({"total_score": 50, "action_required": "ESCALATE"});
        let err = validate_review(&normalize_review(&raw)).unwrap_err();
        assert_eq!(err.path, "$.action_required");
        assert!(err.expected.contains("REQUEST_EXTERNAL_INPUT"));
    }

    #[test]
    fn test_suggestion_without_change_rejected() {
        let raw = json!({
            "total_score": 60,
            "action_required": "MODIFY",
            "suggestions": [{"priority": "HIGH"}],
        });
        let err = validate_review(&normalize_review(&raw)).unwrap_err();
        assert_eq!(err.path, "$.suggestions[0].change");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let raw = json!({
            "review_result": {
                "score": 88,
                "verdict": "approve",
                "suggestions": ["stray string", {"priority": "LOW", "change": "tidy css"}],
            }
        });
        let once = normalize_review(&raw);
        let twice = normalize_review(&once);
        assert_eq!(once, twice);
        let review = validate_review(&once).unwrap();
        assert_eq!(review.suggestions.len(), 1);
    }
}
