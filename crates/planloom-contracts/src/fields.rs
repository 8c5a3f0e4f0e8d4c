//! Strict field readers used by the validators.
//!
//! Each reader returns a [`ValidatorError`] naming the JSON path, the
//! expected value set, and a minimal example fix.

use crate::error::ValidatorError;
use serde_json::{Map, Value};

pub(crate) fn as_object<'a>(
    value: &'a Value,
    path: &str,
) -> Result<&'a Map<String, Value>, ValidatorError> {
    value
        .as_object()
        .ok_or_else(|| ValidatorError::new(path, "a JSON object", "{ }"))
}

pub(crate) fn req_object<'a>(
    obj: &'a Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<&'a Map<String, Value>, ValidatorError> {
    obj.get(key)
        .and_then(Value::as_object)
        .ok_or_else(|| {
            ValidatorError::new(
                format!("{path}.{key}"),
                "a JSON object",
                format!(r#"{{"{key}": {{ }}}}"#),
            )
        })
}

pub(crate) fn req_str(
    obj: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<String, ValidatorError> {
    match obj.get(key).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(ValidatorError::new(
            format!("{path}.{key}"),
            "a non-empty string",
            format!(r#"{{"{key}": "..."}}"#),
        )),
    }
}

pub(crate) fn opt_str(
    obj: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<Option<String>, ValidatorError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ValidatorError::new(
            format!("{path}.{key}"),
            "a string or null",
            format!(r#"{{"{key}": "..."}}"#),
        )),
    }
}

pub(crate) fn req_int_range(
    obj: &Map<String, Value>,
    path: &str,
    key: &str,
    lo: i64,
    hi: i64,
) -> Result<i64, ValidatorError> {
    match obj.get(key).and_then(Value::as_i64) {
        Some(n) if (lo..=hi).contains(&n) => Ok(n),
        _ => Err(ValidatorError::new(
            format!("{path}.{key}"),
            format!("an integer in [{lo}, {hi}]"),
            format!(r#"{{"{key}": {lo}}}"#),
        )),
    }
}

pub(crate) fn opt_int(
    obj: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<Option<i64>, ValidatorError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            ValidatorError::new(
                format!("{path}.{key}"),
                "an integer or null",
                format!(r#"{{"{key}": 0}}"#),
            )
        }),
    }
}

pub(crate) fn opt_f64(
    obj: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<Option<f64>, ValidatorError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            ValidatorError::new(
                format!("{path}.{key}"),
                "a number or null",
                format!(r#"{{"{key}": 1.5}}"#),
            )
        }),
    }
}

pub(crate) fn opt_bool(obj: &Map<String, Value>, key: &str, default: bool) -> bool {
    obj.get(key).and_then(Value::as_bool).unwrap_or(default)
}

pub(crate) fn req_array<'a>(
    obj: &'a Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<&'a Vec<Value>, ValidatorError> {
    obj.get(key).and_then(Value::as_array).ok_or_else(|| {
        ValidatorError::new(
            format!("{path}.{key}"),
            "a JSON array",
            format!(r#"{{"{key}": []}}"#),
        )
    })
}

pub(crate) fn opt_str_array(
    obj: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<Vec<String>, ValidatorError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    ValidatorError::new(
                        format!("{path}.{key}[{i}]"),
                        "a string",
                        format!(r#"{{"{key}": ["..."]}}"#),
                    )
                })
            })
            .collect(),
        Some(_) => Err(ValidatorError::new(
            format!("{path}.{key}"),
            "an array of strings",
            format!(r#"{{"{key}": ["..."]}}"#),
        )),
    }
}

pub(crate) fn req_enum<T>(
    obj: &Map<String, Value>,
    path: &str,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
    allowed: &str,
) -> Result<T, ValidatorError> {
    let raw = obj.get(key).and_then(Value::as_str).unwrap_or_default();
    parse(raw).ok_or_else(|| {
        ValidatorError::new(
            format!("{path}.{key}"),
            format!("one of {allowed}"),
            format!(r#"{{"{key}": "{}"}}"#, allowed.split(" | ").next().unwrap_or("")),
        )
    })
}

pub(crate) fn opt_enum<T>(
    obj: &Map<String, Value>,
    path: &str,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
    allowed: &str,
) -> Result<Option<T>, ValidatorError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => parse(s).map(Some).ok_or_else(|| {
            ValidatorError::new(
                format!("{path}.{key}"),
                format!("one of {allowed}"),
                format!(r#"{{"{key}": "{}"}}"#, allowed.split(" | ").next().unwrap_or("")),
            )
        }),
        Some(_) => Err(ValidatorError::new(
            format!("{path}.{key}"),
            format!("one of {allowed}"),
            format!(r#"{{"{key}": "..."}}"#),
        )),
    }
}

pub(crate) fn check_schema_version(
    obj: &Map<String, Value>,
    expected: &str,
) -> Result<(), ValidatorError> {
    match obj.get("schema_version").and_then(Value::as_str) {
        Some(v) if v == expected => Ok(()),
        _ => Err(ValidatorError::new(
            "$.schema_version",
            format!("the exact string \"{expected}\""),
            format!(r#"{{"schema_version": "{expected}"}}"#),
        )),
    }
}
