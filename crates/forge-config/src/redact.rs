//! Redaction applied to freeform log messages and payload previews.
//!
//! Grounded on `infra/logging/setup.py`'s redaction pass: rather than
//! redacting individual fields, any preview string that *mentions* one of a
//! fixed set of sensitive markers is masked outright, since a freeform
//! message's sensitive span can't be located reliably after the fact.

use crate::LogRedactionMode;

/// Case-insensitive substrings whose presence marks a preview as sensitive.
const SENSITIVE_MARKERS: &[&str] = &["authorization", "password", "token", "secret", "x-api-key"];

/// Applies `mode` to `text`, truncating the result to `preview_chars`
/// characters. `Off` skips substring masking but still truncates, since a
/// log line is a preview, not the record of truth. `Strict` additionally
/// halves the truncation limit.
#[must_use]
pub fn redact(mode: LogRedactionMode, preview_chars: usize, text: &str) -> String {
    let masked = match mode {
        LogRedactionMode::Off => text.to_string(),
        LogRedactionMode::Default | LogRedactionMode::Strict => mask_sensitive(text),
    };
    let limit = match mode {
        LogRedactionMode::Strict => preview_chars / 2,
        _ => preview_chars,
    };
    truncate_chars(&masked, limit)
}

fn mask_sensitive(text: &str) -> String {
    let lower = text.to_lowercase();
    if SENSITIVE_MARKERS.iter().any(|marker| lower.contains(marker)) {
        "[redacted: sensitive content]".to_string()
    } else {
        text.to_string()
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let truncated: String = text.chars().take(limit).collect();
    format!("{truncated}\u{2026}")
}
