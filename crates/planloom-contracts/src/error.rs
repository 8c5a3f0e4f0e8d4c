use serde::{Deserialize, Serialize};

/// A strict-validation failure, naming the offending field.
///
/// The `path` is a JSON path into the normalized value, `expected` names the
/// accepted value set or type, and `example` is a minimal fix the caller (or
/// the model, on retry) can apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorError {
    /// JSON path of the failing field, e.g. `$.nodes[2].node_type`.
    pub path: String,
    /// The accepted value set or type.
    pub expected: String,
    /// A minimal example fix.
    pub example: String,
}

impl ValidatorError {
    /// Build an error for `path` expecting `expected`, with an `example` fix.
    pub fn new(
        path: impl Into<String>,
        expected: impl Into<String>,
        example: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            expected: expected.into(),
            example: example.into(),
        }
    }
}

impl std::fmt::Display for ValidatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "at {}: expected {}; example fix: {}",
            self.path, self.expected, self.example
        )
    }
}

impl std::error::Error for ValidatorError {}
