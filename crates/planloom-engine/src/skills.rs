use planloom_core::{PlanloomError, PlanloomResult};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Seam for turning evidence files into prompt text.
///
/// The shipped implementation handles the plain-text formats directly;
/// richer extractors (PDF, DOCX) plug in behind the same trait.
pub trait TextExtractor: Send + Sync {
    /// Extract up to `max_chars` of text from `path`.
    fn extract(&self, path: &Path, max_chars: usize) -> PlanloomResult<String>;
}

/// Reads text formats as-is; refuses binary formats it cannot interpret.
pub struct PlainTextExtractor;

const TEXT_EXTENSIONS: &[&str] = &["md", "txt", "json", "html", "css", "js", "csv", "yaml", "yml"];

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path, max_chars: usize) -> PlanloomResult<String> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if !TEXT_EXTENSIONS.contains(&ext.as_str()) {
            return Err(PlanloomError::Skill(format!(
                "no extractor for .{ext} files; provide a text version of {}",
                path.display()
            )));
        }
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(text.chars().take(max_chars).collect())
    }
}

/// Idempotency key for a skill run: `sha256(name ⊕ sorted(input_hashes) ⊕ params)`.
pub fn skill_idempotency_key(
    skill_name: &str,
    input_hashes: &[String],
    params: &serde_json::Value,
) -> String {
    let mut sorted = input_hashes.to_vec();
    sorted.sort();
    let mut hasher = Sha256::new();
    hasher.update(skill_name.as_bytes());
    for h in &sorted {
        hasher.update(b"\x1f");
        hasher.update(h.as_bytes());
    }
    hasher.update(b"\x1f");
    hasher.update(params.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_is_order_insensitive() {
        let a = skill_idempotency_key(
            "extract_text",
            &["h1".to_string(), "h2".to_string()],
            &json!({"max": 10}),
        );
        let b = skill_idempotency_key(
            "extract_text",
            &["h2".to_string(), "h1".to_string()],
            &json!({"max": 10}),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_varies_with_name_and_params() {
        let base = skill_idempotency_key("a", &["h".to_string()], &json!({}));
        assert_ne!(base, skill_idempotency_key("b", &["h".to_string()], &json!({})));
        assert_ne!(
            base,
            skill_idempotency_key("a", &["h".to_string()], &json!({"x": 1}))
        );
    }

    #[test]
    fn test_plain_extractor_caps_chars() {
        let dir = std::env::temp_dir().join(format!("planloom-skill-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("note.md");
        std::fs::write(&path, "0123456789").unwrap();

        let text = PlainTextExtractor.extract(&path, 4).unwrap();
        assert_eq!(text, "0123");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_plain_extractor_rejects_binary() {
        let err = PlainTextExtractor
            .extract(Path::new("inputs/spec/scan.pdf"), 100)
            .unwrap_err();
        assert!(matches!(err, PlanloomError::Skill(_)));
    }
}
