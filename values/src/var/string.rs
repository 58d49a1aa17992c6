use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::Hash;
use std::sync::Arc;

use bincode::{Decode, Encode};

use crate::var::error::Error;
use crate::var::{v_err, v_string, Var};

/// A MOO string. Comparison and hashing are case-insensitive, but the
/// original case is preserved for storage and display. Indexing is by
/// character, 0-based at this layer (the interpreter does the 1-based
/// adjustment).
#[derive(Clone, Debug, Encode, Decode)]
pub struct Str {
    inner: Arc<String>,
}

impl Str {
    pub fn from_string(s: String) -> Self {
        Self { inner: Arc::new(s) }
    }

    pub fn from_str(s: &str) -> Self {
        Self {
            inner: Arc::new(s.to_string()),
        }
    }

    pub fn get(&self, offset: usize) -> Option<Var> {
        self.inner
            .chars()
            .nth(offset)
            .map(|c| v_string(c.to_string()))
    }

    /// Replace the character at `offset` with `r`, which must itself be a
    /// single character. Writing at one past the end appends; beyond that is
    /// a range error.
    pub fn set(&self, offset: usize, r: &Str) -> Var {
        if r.len() != 1 {
            return v_err(Error::E_INVARG);
        }
        if offset == self.len() {
            return self.append(r);
        }
        if offset > self.len() {
            return v_err(Error::E_RANGE);
        }
        let s: String = self
            .inner
            .chars()
            .enumerate()
            .map(|(i, c)| {
                if i == offset {
                    r.inner.chars().next().unwrap()
                } else {
                    c
                }
            })
            .collect();
        v_string(s)
    }

    pub fn get_range(&self, range: std::ops::Range<usize>) -> Option<Var> {
        if range.end > self.len() {
            return None;
        }
        let s: String = self
            .inner
            .chars()
            .skip(range.start)
            .take(range.end.saturating_sub(range.start))
            .collect();
        Some(v_string(s))
    }

    pub fn append(&self, other: &Str) -> Var {
        v_string(format!("{}{}", self.inner, other.inner))
    }

    pub fn append_str(&self, other: &str) -> Var {
        v_string(format!("{}{}", self.inner, other))
    }

    pub fn len(&self) -> usize {
        self.inner.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }
}

// All MOO-level string comparison is case-insensitive; case-sensitive
// comparison goes through `Var::equal_strict` and bf_strcmp-style builtins.
impl PartialEq for Str {
    fn eq(&self, other: &Self) -> bool {
        self.inner.eq_ignore_ascii_case(other.inner.as_str())
    }
}
impl Eq for Str {}

impl PartialOrd for Str {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Str {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.inner.chars().map(|c| c.to_ascii_lowercase());
        let rhs = other.inner.chars().map(|c| c.to_ascii_lowercase());
        lhs.cmp(rhs)
    }
}

impl Hash for Str {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for c in self.inner.chars() {
            c.to_ascii_lowercase().hash(state);
        }
    }
}

impl Display for Str {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.inner.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::Str;
    use crate::var::{v_str, v_string};

    #[test]
    fn test_case_insensitive_eq() {
        assert_eq!(Str::from_str("Foo"), Str::from_str("FOO"));
        assert_ne!(Str::from_str("Foo"), Str::from_str("Food"));
    }

    #[test]
    fn test_case_insensitive_ord() {
        assert!(Str::from_str("abc") < Str::from_str("ABD"));
        assert!(Str::from_str("B") > Str::from_str("a"));
    }

    #[test]
    fn test_get_set() {
        let s = Str::from_str("foo");
        assert_eq!(s.get(1), Some(v_str("o")));
        assert_eq!(s.get(3), None);
        assert_eq!(s.set(0, &Str::from_str("b")), v_string("boo".to_string()));
    }
}
