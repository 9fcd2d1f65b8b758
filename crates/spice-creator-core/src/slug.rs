//! Slug helpers for file names and script identifiers.
//!
//! Non-ASCII characters are dropped rather than transliterated.

/// Lowercase, hyphen-separated slug safe for URLs and file names.
///
/// `"My App"` → `"my-app"`
pub fn url_slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.trim().chars() {
        if c.is_whitespace() || c == '-' {
            if !out.ends_with('-') {
                out.push('-');
            }
        } else if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c.to_ascii_lowercase());
        }
    }
    out
}

/// Slug usable as a JavaScript identifier or object key.
///
/// `"My App_1.0.0"` → `"my_app_100"`, leading digits get an underscore prefix.
pub fn var_slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 1);
    for c in text.trim().chars() {
        if c.is_whitespace() || c == '_' {
            if !out.ends_with('_') {
                out.push('_');
            }
        } else if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        }
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}
