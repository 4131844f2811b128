//! String utilities
//!
//! Helpers for keeping credentials and oversized payloads out of log lines.

/// Number of trailing characters of a credential that may appear in logs
pub const VISIBLE_KEY_SUFFIX: usize = 4;

/// Mask a credential so only a short suffix is visible
///
/// Keys with `VISIBLE_KEY_SUFFIX` characters or fewer are masked entirely,
/// otherwise the full credential would leak.
///
/// # Example
/// ```
/// use rag_keyring::utils::mask_key;
///
/// assert_eq!(mask_key("AIzaSyExample1234"), "****1234");
/// assert_eq!(mask_key("abc"), "****");
/// ```
pub fn mask_key(key: &str) -> String {
    let count = key.chars().count();
    if count <= VISIBLE_KEY_SUFFIX {
        return "****".to_string();
    }
    let suffix: String = key.chars().skip(count - VISIBLE_KEY_SUFFIX).collect();
    format!("****{}", suffix)
}

/// Safely truncate a string at a character boundary
///
/// # Example
/// ```
/// use rag_keyring::utils::truncate_str;
///
/// assert_eq!(truncate_str("quota exceeded", 5), "quota");
/// assert_eq!(truncate_str("ok", 100), "ok");
/// ```
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
