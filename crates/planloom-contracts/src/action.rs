//! The `xiaobo_action_v1` contract: executor output on a scheduled task.

use crate::error::ValidatorError;
use crate::fields::{as_object, check_schema_version, opt_str, req_object, req_str};
use crate::normalize::{
    alias_value, apply_aliases, ensure_schema_version, filter_objects, lowercase_field,
    peel_wrappers, uppercase_field,
};
use crate::ACTION_SCHEMA_VERSION;
use planloom_core::ArtifactFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the executor did with the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultType {
    /// A deliverable was produced.
    Artifact,
    /// The task cannot proceed without more input documents.
    NeedsInput,
    /// Nothing to do; no state change.
    Noop,
    /// The executor hit an error it wants the engine to handle.
    Error,
}

impl ResultType {
    /// Canonical uppercase text.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Artifact => "ARTIFACT",
            ResultType::NeedsInput => "NEEDS_INPUT",
            ResultType::Noop => "NOOP",
            ResultType::Error => "ERROR",
        }
    }

    /// Parse the canonical text back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ARTIFACT" => Some(ResultType::Artifact),
            "NEEDS_INPUT" => Some(ResultType::NeedsInput),
            "NOOP" => Some(ResultType::Noop),
            "ERROR" => Some(ResultType::Error),
            _ => None,
        }
    }
}

/// The deliverable payload of an ARTIFACT result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionArtifact {
    /// Deliverable filename, e.g. `index.html`.
    pub name: String,
    /// One of the allowed formats.
    pub format: ArtifactFormat,
    /// Full file contents.
    pub content: String,
}

/// One document requested by a NEEDS_INPUT result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredDoc {
    /// Requirement name the document satisfies.
    pub name: String,
    /// Why it is needed.
    pub reason: Option<String>,
    /// Where the user should drop it.
    pub suggested_path: Option<String>,
}

/// The error payload of an ERROR result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionError {
    /// Optional machine-readable code the model chose.
    pub code: Option<String>,
    /// What went wrong.
    pub message: String,
}

/// The validated `xiaobo_action_v1` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    /// Always [`ACTION_SCHEMA_VERSION`].
    pub schema_version: String,
    /// What the executor did.
    pub result_type: ResultType,
    /// Present iff `result_type == ARTIFACT`.
    pub artifact: Option<ActionArtifact>,
    /// Non-empty iff `result_type == NEEDS_INPUT`.
    pub required_docs: Vec<RequiredDoc>,
    /// Present iff `result_type == ERROR`.
    pub error: Option<ActionError>,
}

/// Normalize an arbitrary model response toward the `xiaobo_action_v1` shape.
pub fn normalize_action(raw: &Value) -> Value {
    let mut obj = match peel_wrappers(raw.clone(), &["result_type"]) {
        Value::Object(obj) => obj,
        other => return other,
    };

    apply_aliases(&mut obj, &[("type", "result_type"), ("docs", "required_docs")]);
    uppercase_field(&mut obj, "result_type");
    alias_value(
        &mut obj,
        "result_type",
        &[("NEED_INPUT", "NEEDS_INPUT"), ("NO_OP", "NOOP")],
    );
    filter_objects(&mut obj, "required_docs");

    if let Some(Value::Object(artifact)) = obj.get_mut("artifact") {
        apply_aliases(
            artifact,
            &[
                ("filename", "name"),
                ("file_name", "name"),
                ("body", "content"),
                ("text", "content"),
            ],
        );
        lowercase_field(artifact, "format");
        // Fall back to the filename extension when the format key is absent.
        if !artifact.contains_key("format") {
            let ext = artifact
                .get("name")
                .and_then(Value::as_str)
                .and_then(|n| n.rsplit_once('.'))
                .map(|(_, ext)| ext.to_lowercase());
            if let Some(ext) = ext.filter(|e| ArtifactFormat::parse(e).is_some()) {
                artifact.insert("format".to_string(), Value::String(ext));
            }
        }
    }
    if let Some(Value::Array(docs)) = obj.get_mut("required_docs") {
        for doc in docs.iter_mut() {
            if let Value::Object(d) = doc {
                apply_aliases(
                    d,
                    &[
                        ("document", "name"),
                        ("title", "name"),
                        ("path", "suggested_path"),
                        ("why", "reason"),
                    ],
                );
            }
        }
    }
    if let Some(Value::Object(error)) = obj.get_mut("error") {
        apply_aliases(error, &[("msg", "message"), ("detail", "message")]);
    }

    ensure_schema_version(&mut obj, ACTION_SCHEMA_VERSION);
    Value::Object(obj)
}

/// Strictly validate a normalized value against `xiaobo_action_v1`.
///
/// The sub-object matching `result_type` is required; the others are ignored
/// if present.
pub fn validate_action(value: &Value) -> Result<ActionResponse, ValidatorError> {
    let obj = as_object(value, "$")?;
    check_schema_version(obj, ACTION_SCHEMA_VERSION)?;

    let raw_type = obj
        .get("result_type")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let result_type = ResultType::parse(raw_type).ok_or_else(|| {
        ValidatorError::new(
            "$.result_type",
            "one of ARTIFACT | NEEDS_INPUT | NOOP | ERROR",
            r#"{"result_type": "ARTIFACT"}"#,
        )
    })?;

    let artifact = match result_type {
        ResultType::Artifact => {
            let a = req_object(obj, "$", "artifact")?;
            let format_raw = a.get("format").and_then(Value::as_str).unwrap_or_default();
            let format = ArtifactFormat::parse(format_raw).ok_or_else(|| {
                ValidatorError::new(
                    "$.artifact.format",
                    "one of md | txt | json | html | css | js",
                    r#"{"artifact": {"format": "md"}}"#,
                )
            })?;
            Some(ActionArtifact {
                name: req_str(a, "$.artifact", "name")?,
                format,
                content: req_str(a, "$.artifact", "content")?,
            })
        }
        _ => None,
    };

    let required_docs = match result_type {
        ResultType::NeedsInput => {
            let docs = obj.get("required_docs").and_then(Value::as_array);
            let docs = docs.filter(|d| !d.is_empty()).ok_or_else(|| {
                ValidatorError::new(
                    "$.required_docs",
                    "a non-empty array of requested documents",
                    r#"{"required_docs": [{"name": "product_spec"}]}"#,
                )
            })?;
            let mut out = Vec::with_capacity(docs.len());
            for (i, raw) in docs.iter().enumerate() {
                let path = format!("$.required_docs[{i}]");
                let d = as_object(raw, &path)?;
                out.push(RequiredDoc {
                    name: req_str(d, &path, "name")?,
                    reason: opt_str(d, &path, "reason")?,
                    suggested_path: opt_str(d, &path, "suggested_path")?,
                });
            }
            out
        }
        _ => Vec::new(),
    };

    let error = match result_type {
        ResultType::Error => {
            let e = req_object(obj, "$", "error")?;
            Some(ActionError {
                code: opt_str(e, "$.error", "code")?,
                message: req_str(e, "$.error", "message")?,
            })
        }
        _ => None,
    };

    Ok(ActionResponse {
        schema_version: ACTION_SCHEMA_VERSION.to_string(),
        result_type,
        artifact,
        required_docs,
        error,
    })
}
