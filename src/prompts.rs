//! Fixed texts exchanged with the description model and persisted as sentinels.
//!
//! Keeping them here means the Describe stage, the retry policies and the
//! tests all agree on the exact strings that end up in `metadatos.json`.
//! Callers can override the prompt and refusal phrases through
//! [`crate::config::PipelineConfig`]; the sentinels are part of the on-disk
//! format and are not configurable.

/// Default instruction sent with every image.
pub const DESCRIBE_IMAGE_PROMPT: &str = "Describe esta imagen en detalle y en español. \
Explica su propósito y contenido dentro de un documento técnico.";

/// Phrases that mark a model answer as a refusal (matched case-insensitively).
pub const DEFAULT_REFUSAL_PHRASES: &[&str] = &["no puedo ver la imagen"];

/// Stored when the model answered but the answer was empty or a refusal.
pub const REFUSAL_SENTINEL: &str = "No se pudo generar una descripción válida.";

/// Prefix of the sentinel stored when the request itself failed.
pub const ERROR_SENTINEL_PREFIX: &str = "Error de API: ";

/// Substring the retry entry point scans for.
pub const ERROR_MARKER: &str = "Error";

/// Build the sentinel persisted for a failed description request.
pub fn error_sentinel(detail: &str) -> String {
    format!("{ERROR_SENTINEL_PREFIX}{detail}")
}

/// True when `text` contains any refusal phrase, ignoring case.
pub fn is_refusal(text: &str, phrases: &[String]) -> bool {
    let lower = text.to_lowercase();
    phrases
        .iter()
        .any(|p| !p.is_empty() && lower.contains(&p.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phrases() -> Vec<String> {
        DEFAULT_REFUSAL_PHRASES.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn refusal_is_case_insensitive() {
        assert!(is_refusal("Lo siento, NO PUEDO VER LA IMAGEN adjunta.", &phrases()));
        assert!(!is_refusal("Un diagrama de bloques del sistema.", &phrases()));
    }

    #[test]
    fn empty_phrase_never_matches() {
        assert!(!is_refusal("cualquier texto", &[String::new()]));
    }

    #[test]
    fn error_sentinel_carries_marker() {
        let s = error_sentinel("connection refused");
        assert!(s.contains(ERROR_MARKER));
        assert!(s.ends_with("connection refused"));
        assert!(!REFUSAL_SENTINEL.contains(ERROR_MARKER));
    }
}
