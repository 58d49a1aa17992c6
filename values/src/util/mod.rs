pub mod bitenum;
pub mod bytes;

pub use bitenum::{BitEnum, ToPrimitive};

/// Match one verb-name pattern word against one candidate word, following the
/// classic server's rules:
/// - `*` at the end: the pattern word matches any candidate beginning with
///   the part before the star (`foo*` matches "foo", "foobar", ...).
/// - `*` in the middle: matches any prefix of the whole pattern word at least
///   as long as the part before the star (`foo*bar` matches "foo", "foob",
///   ..., "foobar").
/// - a bare `*` matches anything.
///
/// Comparison is case-insensitive.
#[must_use]
pub fn verbname_cmp(pattern: &str, candidate: &str) -> bool {
    fn starts_with_fold(haystack: &str, prefix: &str) -> bool {
        let mut h = haystack.chars();
        for p in prefix.chars() {
            match h.next() {
                Some(c) if c.eq_ignore_ascii_case(&p) => {}
                _ => return false,
            }
        }
        true
    }

    match pattern.find('*') {
        None => pattern.eq_ignore_ascii_case(candidate),
        Some(pos) => {
            let prefix = &pattern[..pos];
            let rest = &pattern[pos + 1..];
            if rest.is_empty() {
                // trailing star: candidate must begin with the prefix
                starts_with_fold(candidate, prefix)
            } else {
                // inner star: candidate must be a prefix of the pattern with
                // the star removed, at least as long as the part before it
                let full = format!("{prefix}{rest}");
                candidate.chars().count() >= prefix.chars().count()
                    && starts_with_fold(&full, candidate)
            }
        }
    }
}

/// Match a full verb names pattern (one or more whitespace-separated words)
/// against a candidate name.
#[must_use]
pub fn verbnames_match(names: &str, candidate: &str) -> bool {
    names
        .split_whitespace()
        .any(|w| verbname_cmp(w, candidate))
}

/// Render a string as a quoted literal, escaping quotes and backslashes.
#[must_use]
pub fn quote_str(s: &str) -> String {
    let mut output = String::from("\"");
    for c in s.chars() {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            c => output.push(c),
        }
    }
    output.push('"');
    output
}

/// Parse a quoted string literal back to its contents; the inverse of
/// [`quote_str`].
pub fn unquote_str(s: &str) -> Result<String, String> {
    let mut output = String::new();
    let mut chars = s.chars();
    let Some('"') = chars.next() else {
        return Err("expected \" at beginning of string".to_string());
    };
    loop {
        match chars.next() {
            Some('\\') => match chars.next() {
                Some(c) => output.push(c),
                None => return Err("unexpected end of string".to_string()),
            },
            Some('"') => {
                if chars.next().is_some() {
                    return Err("unexpected \" in string".to_string());
                }
                return Ok(output);
            }
            Some(c) => output.push(c),
            None => return Err("unexpected end of string".to_string()),
        }
    }
}

/// Split a command line into words, honoring double quotes and backslash
/// escapes.
#[must_use]
pub fn parse_into_words(input: &str) -> Vec<String> {
    let mut words = vec![];
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for c in input.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            in_quotes = !in_quotes;
        } else if c.is_whitespace() && !in_quotes {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Strip the characters the string type cannot carry: control characters
/// other than tab.
#[must_use]
pub fn sanitize_line(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbname_exact() {
        assert!(verbname_cmp("give", "give"));
        assert!(verbname_cmp("give", "GIVE"));
        assert!(!verbname_cmp("give", "giv"));
        assert!(!verbname_cmp("do", "do_object"));
    }

    #[test]
    fn test_verbname_trailing_star() {
        assert!(verbname_cmp("*", "anything"));
        assert!(verbname_cmp("foo*", "foo"));
        assert!(verbname_cmp("foo*", "foobar"));
        assert!(verbname_cmp("foo*", "foogleman"));
        assert!(!verbname_cmp("foo*", "fo"));
    }

    #[test]
    fn test_verbname_inner_star() {
        // "foo*bar" matches foo, foob, fooba, foobar; not fo or foobaar
        assert!(verbname_cmp("foo*bar", "foo"));
        assert!(verbname_cmp("foo*bar", "foob"));
        assert!(verbname_cmp("foo*bar", "fooba"));
        assert!(verbname_cmp("foo*bar", "foobar"));
        assert!(!verbname_cmp("foo*bar", "fo"));
        assert!(!verbname_cmp("foo*bar", "foobaar"));
        assert!(!verbname_cmp("g*ive", "gender"));
    }

    #[test]
    fn test_verbnames_multi() {
        assert!(verbnames_match("g*et take", "take"));
        assert!(verbnames_match("g*et take", "get"));
        assert!(verbnames_match("g*et take", "ge"));
        assert!(!verbnames_match("g*et take", "tak"));
    }

    #[test]
    fn test_quote_roundtrip() {
        for s in ["foo", "foo\"bar", "foo\\bar", ""] {
            assert_eq!(unquote_str(&quote_str(s)).unwrap(), s);
        }
    }

    #[test]
    fn test_parse_into_words() {
        assert_eq!(parse_into_words("hello world"), vec!["hello", "world"]);
        assert_eq!(
            parse_into_words("hello \"big world\""),
            vec!["hello", "big world"]
        );
        assert_eq!(
            parse_into_words(r"hello\ world frankly"),
            vec!["hello world", "frankly"]
        );
        assert_eq!(parse_into_words("   "), Vec::<String>::new());
    }

    #[test]
    fn test_sanitize_line() {
        assert_eq!(sanitize_line("a\x07b\tc"), "ab\tc");
    }
}
