//! Environment variable interpolation for configuration values.
//!
//! Supported forms (variable names are upper-case):
//! - `${VAR}` - value of `VAR`, empty when unset
//! - `${VAR:-default}` - value of `VAR`, or `default` when unset
//! - `$VAR` - value of `VAR`, empty when unset

use regex::{Captures, Regex};
use std::sync::LazyLock;

static BRACED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(:-([^}]*))?\}").expect("valid braced env pattern")
});

static BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Z_][A-Z0-9_]*)").expect("valid bare env pattern"));

/// Expand environment variables in `input` using the process environment.
pub fn expand(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

/// Expand variables using `lookup` to resolve names.
pub fn expand_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let braced = BRACED.replace_all(input, |caps: &Captures| {
        lookup(&caps[1]).unwrap_or_else(|| {
            caps.get(3)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        })
    });

    BARE.replace_all(&braced, |caps: &Captures| lookup(&caps[1]).unwrap_or_default())
        .into_owned()
}

/// Expand every entry of a pattern list in place.
pub fn expand_all(values: &mut [String]) {
    for value in values.iter_mut() {
        *value = expand(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "FTP_PASSWORD" => Some("hunter2".to_string()),
            "HOST" => Some("ftp.example.com".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_braced_variable() {
        assert_eq!(expand_with("${FTP_PASSWORD}", lookup), "hunter2");
    }

    #[test]
    fn test_braced_default_used_when_unset() {
        assert_eq!(expand_with("${MISSING:-fallback}", lookup), "fallback");
        assert_eq!(expand_with("${HOST:-fallback}", lookup), "ftp.example.com");
    }

    #[test]
    fn test_bare_variable() {
        assert_eq!(expand_with("ftp://$HOST/data", lookup), "ftp://ftp.example.com/data");
    }

    #[test]
    fn test_unset_expands_to_empty() {
        assert_eq!(expand_with("a${MISSING}b$ALSO_MISSING", lookup), "ab");
    }

    #[test]
    fn test_lowercase_and_prices_untouched() {
        assert_eq!(expand_with("$lower costs $5.00", lookup), "$lower costs $5.00");
    }
}
