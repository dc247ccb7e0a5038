//! URL-safe slugs for labels and artifact names.

use once_cell::sync::Lazy;

/// Windows device names that cannot be used as bare file stems.
static RESERVED_STEMS: Lazy<Vec<&'static str>> = Lazy::new(|| vec!["CON", "PRN", "AUX", "NUL"]);

/// Maximum length of the label prefix considered when slugifying.
const SLUG_SOURCE_LIMIT: usize = 40;

/// Converts a label into a lowercase, hyphen-separated, ASCII-only slug.
///
/// Only the first forty characters of the label contribute, so very long
/// labels that differ late in the string produce the same slug.
pub fn slugify(value: &str) -> String {
    let prefix: String = value.chars().take(SLUG_SOURCE_LIMIT).collect();

    let mut slug = String::with_capacity(prefix.len());
    let mut last_was_separator = true;
    for c in prefix.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_separator = false;
        } else if !last_was_separator {
            slug.push('-');
            last_was_separator = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Slugifies a label and guards against slugs that collide with reserved
/// filesystem names, since label slugs end up in artifact paths.
pub fn artifact_safe_slug(value: &str) -> String {
    let slug = slugify(value);
    if RESERVED_STEMS
        .iter()
        .any(|r| r.eq_ignore_ascii_case(&slug))
    {
        format!("_{slug}")
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_slugify() {
        assert_eq!(slugify("Pavements/footpaths"), "pavements-footpaths");
        assert_eq!(slugify("  Street Lighting  "), "street-lighting");
        assert_eq!(slugify("Monday"), "monday");
    }

    #[test]
    fn test_non_ascii_dropped() {
        assert_eq!(slugify("Café & Bar"), "caf-bar");
    }

    #[test]
    fn test_truncation() {
        let long = "a".repeat(60);
        assert_eq!(slugify(&long).len(), 40);
    }

    #[test]
    fn test_reserved_stem_guard() {
        assert_eq!(artifact_safe_slug("Con"), "_con");
        assert_eq!(artifact_safe_slug("Conservative"), "conservative");
        assert_eq!(artifact_safe_slug("Potholes"), "potholes");
    }
}
