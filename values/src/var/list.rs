use std::ops::Index;
use std::sync::Arc;

use bincode::{Decode, Encode};

use crate::var::Var;

/// A MOO list: an immutable, shared sequence of values. All "mutations"
/// produce a fresh list; cheap clones make that affordable.
#[derive(Clone, Encode, Decode, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct List {
    inner: Arc<Vec<Var>>,
}

impl List {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Vec::new()),
        }
    }

    pub fn from_vec(v: Vec<Var>) -> Self {
        Self { inner: Arc::new(v) }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Var> {
        self.inner.get(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Var> {
        self.inner.iter()
    }

    pub fn contains(&self, v: &Var) -> bool {
        self.inner.contains(v)
    }

    pub fn as_slice(&self) -> &[Var] {
        self.inner.as_slice()
    }

    pub fn to_vec(&self) -> Vec<Var> {
        self.inner.as_ref().clone()
    }

    /// A copy with `v` appended.
    #[must_use]
    pub fn push(&self, v: Var) -> Self {
        let mut nv = self.to_vec();
        nv.push(v);
        Self::from_vec(nv)
    }

    /// A copy with index `idx` replaced.
    #[must_use]
    pub fn set(&self, idx: usize, v: Var) -> Self {
        let mut nv = self.to_vec();
        nv[idx] = v;
        Self::from_vec(nv)
    }

    /// A copy with `v` inserted before index `idx` (clamped to the end).
    #[must_use]
    pub fn insert(&self, idx: usize, v: Var) -> Self {
        let mut nv = self.to_vec();
        let idx = idx.min(nv.len());
        nv.insert(idx, v);
        Self::from_vec(nv)
    }

    /// A copy with index `idx` removed.
    #[must_use]
    pub fn remove_at(&self, idx: usize) -> Self {
        let mut nv = self.to_vec();
        nv.remove(idx);
        Self::from_vec(nv)
    }

    /// A copy with the first element equal to `v` removed.
    #[must_use]
    pub fn remove_value(&self, v: &Var) -> Self {
        match self.inner.iter().position(|x| x == v) {
            Some(i) => self.remove_at(i),
            None => self.clone(),
        }
    }

    /// A copy with `other`'s elements appended.
    #[must_use]
    pub fn append(&self, other: &Self) -> Self {
        let mut nv = self.to_vec();
        nv.extend(other.iter().cloned());
        Self::from_vec(nv)
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<usize> for List {
    type Output = Var;

    fn index(&self, index: usize) -> &Self::Output {
        &self.inner[index]
    }
}

impl<'a> IntoIterator for &'a List {
    type Item = &'a Var;
    type IntoIter = std::slice::Iter<'a, Var>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

impl FromIterator<Var> for List {
    fn from_iter<T: IntoIterator<Item = Var>>(iter: T) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}
