//! Input sanitization used for role/goal/task-description/config-map text
//! throughout the crate.
//!
//! Corresponds to the safety rules every constructor of a user-supplied
//! string runs through before an `Agent`/`Task`/`Crew` is allowed to exist.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

static DANGEROUS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    let patterns = [
        r"(?is)<script[^>]*>.*?</script>",
        r"(?i)javascript:",
        r"(?i)vbscript:",
        r"(?i)\son\w+\s*=", // event-handler attributes, e.g. onclick=
        r"(?i)eval\(",
        r"(?i)exec\(",
        r"(?i)system\(",
        r"(?i)shell_exec\(",
        r"(?i)passthru\(",
        r"(?i)proc_open\(",
    ];
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("static sanitizer pattern must compile"))
        .collect()
});

/// Strip control characters (NUL/CR/LF/TAB), trim, and cap at `max_len`.
/// Does not reject anything by itself — pair with [`reject_dangerous`].
pub fn clean(input: &str, max_len: usize) -> String {
    let stripped: String = input
        .chars()
        .filter(|c| !matches!(c, '\0' | '\r' | '\n' | '\t'))
        .collect();
    let trimmed = stripped.trim();
    if trimmed.chars().count() > max_len {
        trimmed.chars().take(max_len).collect()
    } else {
        trimmed.to_string()
    }
}

/// Reject input matching any dangerous pattern.
pub fn reject_dangerous(input: &str) -> Result<()> {
    for re in DANGEROUS_PATTERNS.iter() {
        if re.is_match(input) {
            return Err(Error::InputRejected(format!(
                "input matched a disallowed pattern: {:?}",
                re.as_str()
            )));
        }
    }
    Ok(())
}

/// Clean, enforce length, and reject dangerous content. This is the
/// sanitizer entry point every field constructor calls.
///
/// `field` names the field for the `InputTooLong` error; the length check
/// happens before the dangerous-pattern check in (pre-clean) source text so
/// that an over-length field reports `InputTooLong` even if it also happens
/// to contain a disallowed pattern.
pub fn sanitize(field: &str, input: &str, max_len: usize) -> Result<String> {
    let cleaned = clean(input, max_len);
    if input.trim().chars().count() > max_len {
        return Err(Error::InputTooLong {
            field: field.to_string(),
            len: input.trim().chars().count(),
            max: max_len,
        });
    }
    reject_dangerous(&cleaned)?;
    Ok(cleaned)
}

/// `sanitize` is idempotent: sanitizing already-sanitized output returns it
/// unchanged (the invariant tested in `idempotence`).
pub fn sanitize_idempotent(field: &str, input: &str, max_len: usize) -> Result<String> {
    let once = sanitize(field, input, max_len)?;
    let twice = sanitize(field, &once, max_len)?;
    debug_assert_eq!(once, twice);
    Ok(once)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_control_chars_and_trims() {
        assert_eq!(clean("  a\0b\rc\nd\te  ", 100), "abcde");
    }

    #[test]
    fn caps_length() {
        assert_eq!(clean("abcdef", 3), "abc");
    }

    #[test]
    fn rejects_script_tags() {
        assert!(reject_dangerous("hello <script>alert(1)</script> world").is_err());
    }

    #[test]
    fn rejects_javascript_uri() {
        assert!(reject_dangerous("javascript:alert(1)").is_err());
    }

    #[test]
    fn rejects_event_handler_attrs() {
        assert!(reject_dangerous("<img src=x onerror=alert(1)>").is_err());
    }

    #[test]
    fn accepts_clean_text() {
        assert!(reject_dangerous("Write a blog post about Rust").is_ok());
    }

    #[test]
    fn sanitize_rejects_over_length_role() {
        let long = "x".repeat(300);
        let err = sanitize("role", &long, 255).unwrap_err();
        assert!(matches!(err, Error::InputTooLong { .. }));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let a = sanitize("goal", "Write a  blog\tpost", 1000).unwrap();
        let b = sanitize("goal", &a, 1000).unwrap();
        assert_eq!(a, b);
    }
}
