//! Shared utility functions for provider adapters.

use px_domain::error::Error;

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Bound an error body for inclusion in an error message.
pub(crate) fn body_excerpt(body: &str) -> &str {
    let cut = body
        .char_indices()
        .nth(400)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    &body[..cut]
}

/// Mask substrings that look like API keys or bearer tokens in an error
/// message so raw secrets never reach logs or trace events.
pub(crate) fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..]);
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_excerpt_bounds_long_bodies() {
        let body = "x".repeat(1000);
        assert_eq!(body_excerpt(&body).len(), 400);
    }

    #[test]
    fn body_excerpt_keeps_short_bodies() {
        assert_eq!(body_excerpt("oops"), "oops");
    }

    #[test]
    fn mask_secrets_hides_key_like_tokens() {
        let msg = "auth failed for key sk-abcdefghijklmnop1234567890";
        let masked = mask_secrets(msg);
        assert!(!masked.contains("abcdefghijklmnop"));
        assert!(masked.contains("..."));
    }

    #[test]
    fn mask_secrets_leaves_prose_alone() {
        let msg = "connection refused by upstream";
        assert_eq!(mask_secrets(msg), msg);
    }
}
