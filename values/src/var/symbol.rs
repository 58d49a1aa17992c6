use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bincode::{Decode, Encode};

/// A case-insensitive identifier, used for variable, property and verb names.
/// Comparison and hashing fold case; the case as originally written is kept
/// for display.
#[derive(Clone, Encode, Decode)]
pub struct Symbol {
    inner: Arc<String>,
}

impl Symbol {
    pub fn mk(s: &str) -> Self {
        Self {
            inner: Arc::new(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::mk(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self { inner: Arc::new(s) }
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.inner.eq_ignore_ascii_case(other.inner.as_str())
    }
}
impl Eq for Symbol {}

impl PartialEq<str> for Symbol {
    fn eq(&self, other: &str) -> bool {
        self.inner.eq_ignore_ascii_case(other)
    }
}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for c in self.inner.chars() {
            c.to_ascii_lowercase().hash(state);
        }
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let lhs = self.inner.chars().map(|c| c.to_ascii_lowercase());
        let rhs = other.inner.chars().map(|c| c.to_ascii_lowercase());
        lhs.cmp(rhs)
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.inner.as_str())
    }
}

impl Debug for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}", self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::Symbol;
    use std::collections::HashMap;

    #[test]
    fn test_case_fold() {
        assert_eq!(Symbol::mk("Description"), Symbol::mk("description"));
        let mut m = HashMap::new();
        m.insert(Symbol::mk("Foo"), 1);
        assert_eq!(m.get(&Symbol::mk("FOO")), Some(&1));
        // case preserved for display
        assert_eq!(Symbol::mk("Foo").to_string(), "Foo");
    }
}
