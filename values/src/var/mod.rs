use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};

use bincode::{Decode, Encode};
use decorum::R64;
use lazy_static::lazy_static;
use strum::FromRepr;

use crate::util::quote_str;
use crate::var::error::Error;
use crate::var::error::Error::{E_DIV, E_FLOAT, E_INVARG, E_RANGE, E_TYPE};
use crate::var::list::List;
use crate::var::objid::Objid;
use crate::var::string::Str;

pub mod error;
pub mod list;
pub mod objid;
pub mod string;
pub mod symbol;
pub mod variant;

pub use symbol::Symbol;
pub use variant::Variant;



lazy_static! {
    static ref VAR_NONE: Var = Var::new(Variant::None);
    static ref VAR_EMPTY_LIST: Var = Var::new(Variant::List(List::new()));
    static ref VAR_EMPTY_STR: Var = Var::new(Variant::Str(Str::from_str("")));
}

/// Integer encoding of value types, as reported by the `typeof` builtin.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromRepr)]
#[allow(non_camel_case_types)]
pub enum VarType {
    TYPE_INT = 0,
    TYPE_OBJ = 1,
    TYPE_STR = 2,
    TYPE_ERR = 3,
    TYPE_LIST = 4,
    TYPE_NONE = 6,
    TYPE_FLOAT = 9,
}

/// Var is the tagged union representing MOO's dynamically typed values.
#[derive(Clone, Encode, Decode)]
pub struct Var {
    value: Variant,
}

impl Var {
    #[must_use]
    pub fn new(value: Variant) -> Self {
        Self { value }
    }

    #[must_use]
    pub fn variant(&self) -> &Variant {
        &self.value
    }

    #[must_use]
    pub fn type_id(&self) -> VarType {
        match self.variant() {
            Variant::None => VarType::TYPE_NONE,
            Variant::Int(_) => VarType::TYPE_INT,
            Variant::Float(_) => VarType::TYPE_FLOAT,
            Variant::Str(_) => VarType::TYPE_STR,
            Variant::Obj(_) => VarType::TYPE_OBJ,
            Variant::Err(_) => VarType::TYPE_ERR,
            Variant::List(_) => VarType::TYPE_LIST,
        }
    }

    #[must_use]
    pub fn to_literal(&self) -> String {
        match self.variant() {
            Variant::None => "0".to_string(),
            Variant::Int(i) => i.to_string(),
            Variant::Float(f) => format!("{f:?}"),
            Variant::Str(s) => quote_str(s.as_str()),
            Variant::Obj(o) => o.to_literal(),
            Variant::Err(e) => e.name().to_string(),
            Variant::List(l) => {
                let mut result = String::new();
                result.push('{');
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        result.push_str(", ");
                    }
                    result.push_str(&v.to_literal());
                }
                result.push('}');
                result
            }
        }
    }

    /// The unquoted rendering used by `tostr` and output composition.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self.variant() {
            Variant::Str(s) => s.as_str().to_string(),
            Variant::List(_) => "{list}".to_string(),
            Variant::Err(e) => e.message().to_string(),
            _ => self.to_literal(),
        }
    }
}

#[must_use]
pub fn v_bool(b: bool) -> Var {
    Var::new(Variant::Int(i64::from(b)))
}

#[must_use]
pub fn v_int(i: i64) -> Var {
    Var::new(Variant::Int(i))
}

#[must_use]
pub fn v_float(f: f64) -> Var {
    Var::new(Variant::Float(f))
}

#[must_use]
pub fn v_str(s: &str) -> Var {
    Var::new(Variant::Str(Str::from_str(s)))
}

#[must_use]
pub fn v_string(s: String) -> Var {
    Var::new(Variant::Str(Str::from_string(s)))
}

#[must_use]
pub fn v_objid(o: Objid) -> Var {
    Var::new(Variant::Obj(o))
}

#[must_use]
pub fn v_obj(o: i64) -> Var {
    Var::new(Variant::Obj(Objid(o)))
}

#[must_use]
pub fn v_err(e: Error) -> Var {
    Var::new(Variant::Err(e))
}

#[must_use]
pub fn v_list(l: Vec<Var>) -> Var {
    Var::new(Variant::List(List::from_vec(l)))
}

#[must_use]
pub fn v_listv(l: List) -> Var {
    Var::new(Variant::List(l))
}

#[must_use]
pub fn v_empty_list() -> Var {
    VAR_EMPTY_LIST.clone()
}

#[must_use]
pub fn v_empty_str() -> Var {
    VAR_EMPTY_STR.clone()
}

#[must_use]
pub fn v_none() -> Var {
    VAR_NONE.clone()
}

/// A finite float result, or the error its computation deserves: E_FLOAT for
/// infinities, E_INVARG for NaN.
fn f_result(f: f64) -> Result<Var, Error> {
    if f.is_nan() {
        return Err(E_INVARG);
    }
    if f.is_infinite() {
        return Err(E_FLOAT);
    }
    Ok(v_float(f))
}

impl Var {
    #[must_use]
    pub fn is_true(&self) -> bool {
        match self.variant() {
            Variant::Int(i) => *i != 0,
            Variant::Float(f) => *f != 0.0,
            Variant::Str(s) => !s.is_empty(),
            Variant::List(l) => !l.is_empty(),
            _ => false,
        }
    }

    /// Identity-level equality: exact, case-sensitive, recursive.
    #[must_use]
    pub fn equal_strict(&self, other: &Self) -> bool {
        match (self.variant(), other.variant()) {
            (Variant::None, Variant::None) => true,
            (Variant::Int(l), Variant::Int(r)) => l == r,
            (Variant::Float(l), Variant::Float(r)) => l == r,
            (Variant::Str(l), Variant::Str(r)) => l.as_str() == r.as_str(),
            (Variant::Obj(l), Variant::Obj(r)) => l == r,
            (Variant::Err(l), Variant::Err(r)) => l == r,
            (Variant::List(l), Variant::List(r)) => {
                l.len() == r.len()
                    && l.iter()
                        .zip(r.iter())
                        .all(|(a, b)| a.equal_strict(b))
            }
            (_, _) => false,
        }
    }

    /// Ordering for the comparison operators: defined only within a same-type
    /// pair of int, float, string, object or error.
    pub fn compare(&self, other: &Self) -> Result<Ordering, Error> {
        match (self.variant(), other.variant()) {
            (Variant::Int(l), Variant::Int(r)) => Ok(l.cmp(r)),
            (Variant::Float(l), Variant::Float(r)) => Ok(R64::from(*l).cmp(&R64::from(*r))),
            (Variant::Str(l), Variant::Str(r)) => Ok(l.cmp(r)),
            (Variant::Obj(l), Variant::Obj(r)) => Ok(l.cmp(r)),
            (Variant::Err(l), Variant::Err(r)) => Ok(l.cmp(r)),
            (_, _) => Err(E_TYPE),
        }
    }

    /// 1-based index of the first occurrence of `v` in `self`, 0 when absent.
    pub fn index_in(&self, v: &Self) -> Result<Self, Error> {
        let Variant::List(l) = self.variant() else {
            return Err(E_TYPE);
        };
        match l.iter().position(|x| x == v) {
            None => Ok(v_int(0)),
            Some(i) => Ok(v_int(i as i64 + 1)),
        }
    }

    pub fn add(&self, v: &Self) -> Result<Self, Error> {
        match (self.variant(), v.variant()) {
            (Variant::Int(l), Variant::Int(r)) => Ok(v_int(l.wrapping_add(*r))),
            (Variant::Float(l), Variant::Float(r)) => f_result(*l + *r),
            (Variant::Str(l), Variant::Str(r)) => Ok(l.append(r)),
            (_, _) => Err(E_TYPE),
        }
    }

    pub fn sub(&self, v: &Self) -> Result<Self, Error> {
        match (self.variant(), v.variant()) {
            (Variant::Int(l), Variant::Int(r)) => Ok(v_int(l.wrapping_sub(*r))),
            (Variant::Float(l), Variant::Float(r)) => f_result(*l - *r),
            (_, _) => Err(E_TYPE),
        }
    }

    pub fn mul(&self, v: &Self) -> Result<Self, Error> {
        match (self.variant(), v.variant()) {
            (Variant::Int(l), Variant::Int(r)) => Ok(v_int(l.wrapping_mul(*r))),
            (Variant::Float(l), Variant::Float(r)) => f_result(*l * *r),
            (_, _) => Err(E_TYPE),
        }
    }

    pub fn div(&self, v: &Self) -> Result<Self, Error> {
        match (self.variant(), v.variant()) {
            (Variant::Int(_), Variant::Int(0)) => Err(E_DIV),
            // i64::MIN / -1 is defined to be i64::MIN rather than trapping.
            (Variant::Int(l), Variant::Int(r)) => Ok(v_int(l.wrapping_div(*r))),
            (Variant::Float(_), Variant::Float(r)) if *r == 0.0 => Err(E_DIV),
            (Variant::Float(l), Variant::Float(r)) => f_result(*l / *r),
            (_, _) => Err(E_TYPE),
        }
    }

    pub fn modulus(&self, v: &Self) -> Result<Self, Error> {
        match (self.variant(), v.variant()) {
            (Variant::Int(_), Variant::Int(0)) => Err(E_DIV),
            (Variant::Int(l), Variant::Int(r)) => Ok(v_int(l.wrapping_rem(*r))),
            (Variant::Float(_), Variant::Float(r)) if *r == 0.0 => Err(E_DIV),
            (Variant::Float(l), Variant::Float(r)) => f_result(*l % *r),
            (_, _) => Err(E_TYPE),
        }
    }

    pub fn pow(&self, v: &Self) -> Result<Self, Error> {
        match (self.variant(), v.variant()) {
            (Variant::Int(l), Variant::Int(r)) => {
                if *r < 0 {
                    // Negative integer exponents truncate to zero except for
                    // the bases where the true result is integral.
                    return match *l {
                        0 => Err(E_DIV),
                        1 => Ok(v_int(1)),
                        -1 => Ok(v_int(if r % 2 == 0 { 1 } else { -1 })),
                        _ => Ok(v_int(0)),
                    };
                }
                let exp = u32::try_from(*r).unwrap_or(u32::MAX);
                Ok(v_int(l.wrapping_pow(exp)))
            }
            (Variant::Float(l), Variant::Float(r)) => f_result(l.powf(*r)),
            (_, _) => Err(E_TYPE),
        }
    }

    pub fn negative(&self) -> Result<Self, Error> {
        match self.variant() {
            Variant::Int(l) => Ok(v_int(l.wrapping_neg())),
            Variant::Float(f) => Ok(v_float(-*f)),
            _ => Err(E_TYPE),
        }
    }

    /// 0-based single-element index into a list or string.
    pub fn index(&self, idx: usize) -> Result<Self, Error> {
        match self.variant() {
            Variant::List(l) => match l.get(idx) {
                None => Err(E_RANGE),
                Some(v) => Ok(v.clone()),
            },
            Variant::Str(s) => match s.get(idx) {
                None => Err(E_RANGE),
                Some(v) => Ok(v),
            },
            _ => Err(E_TYPE),
        }
    }

    /// Replace the 0-based index `idx`, yielding a new composite.
    pub fn index_set(&self, idx: usize, value: &Self) -> Result<Self, Error> {
        match self.variant() {
            Variant::List(l) => {
                if idx >= l.len() {
                    return Err(E_RANGE);
                }
                Ok(v_listv(l.set(idx, value.clone())))
            }
            Variant::Str(s) => {
                let Variant::Str(r) = value.variant() else {
                    return Err(E_INVARG);
                };
                let result = s.set(idx, r);
                match result.variant() {
                    Variant::Err(e) => Err(*e),
                    _ => Ok(result),
                }
            }
            _ => Err(E_TYPE),
        }
    }

    /// Association-list lookup: `self` must be a list of `{key, value}`
    /// pairs with string keys. Missing key is a range error; a malformed
    /// shape is a type error.
    pub fn assoc_get(&self, key: &Str) -> Result<Self, Error> {
        let Variant::List(l) = self.variant() else {
            return Err(E_TYPE);
        };
        for pair in l.iter() {
            let Variant::List(p) = pair.variant() else {
                return Err(E_TYPE);
            };
            if p.len() != 2 {
                return Err(E_TYPE);
            }
            let Variant::Str(k) = p[0].variant() else {
                return Err(E_TYPE);
            };
            if k == key {
                return Ok(p[1].clone());
            }
        }
        Err(E_RANGE)
    }

    /// Association-list store, replacing the value for `key`.
    pub fn assoc_set(&self, key: &Str, value: &Self) -> Result<Self, Error> {
        let Variant::List(l) = self.variant() else {
            return Err(E_TYPE);
        };
        for (i, pair) in l.iter().enumerate() {
            let Variant::List(p) = pair.variant() else {
                return Err(E_TYPE);
            };
            if p.len() != 2 {
                return Err(E_TYPE);
            }
            let Variant::Str(k) = p[0].variant() else {
                return Err(E_TYPE);
            };
            if k == key {
                let npair = v_listv(p.set(1, value.clone()));
                return Ok(v_listv(l.set(i, npair)));
            }
        }
        Err(E_RANGE)
    }

    /// 1-based inclusive range extraction; `to < from` yields the empty
    /// list/string.
    pub fn range(&self, from: i64, to: i64) -> Result<Self, Error> {
        match self.variant() {
            Variant::Str(s) => {
                let len = s.len() as i64;
                if to < from {
                    return Ok(v_empty_str());
                }
                if from <= 0 || from > len + 1 || to > len {
                    return Err(E_RANGE);
                }
                let (from, to) = (from as usize, to as usize);
                Ok(s.get_range(from - 1..to).unwrap())
            }
            Variant::List(l) => {
                let len = l.len() as i64;
                if to < from {
                    return Ok(v_empty_list());
                }
                if from <= 0 || from > len + 1 || to < 1 || to > len {
                    return Err(E_RANGE);
                }
                let mut res = Vec::with_capacity((to - from + 1) as usize);
                for i in from..=to {
                    res.push(l[(i - 1) as usize].clone());
                }
                Ok(v_list(res))
            }
            _ => Err(E_TYPE),
        }
    }

    /// 1-based inclusive range replacement, splicing `value` in place of
    /// elements `from..=to`. `to < from` denotes an empty splice (pure
    /// insertion before `from`).
    pub fn rangeset(&self, value: Self, from: i64, to: i64) -> Result<Self, Error> {
        let base_len = match (self.variant(), value.variant()) {
            (Variant::Str(s), Variant::Str(_)) => s.len() as i64,
            (Variant::List(l), Variant::List(_)) => l.len() as i64,
            _ => return Err(E_TYPE),
        };

        if from <= 0 || from > base_len + 1 || to < 0 || to > base_len {
            return Err(E_RANGE);
        }
        // pre = [1..from-1], post = [to+1..len]; an empty splice keeps both.
        let pre_end = (from - 1).max(0) as usize;
        let post_start = to.max(from - 1) as usize;

        match (self.variant(), value.variant()) {
            (Variant::Str(s), Variant::Str(_)) => {
                let pre = s.get_range(0..pre_end).unwrap_or_else(v_empty_str);
                let ans = pre.add(&value)?;
                let post = s
                    .get_range(post_start..s.len())
                    .unwrap_or_else(v_empty_str);
                ans.add(&post)
            }
            (Variant::List(l), Variant::List(vl)) => {
                let mut ans: Vec<Self> = Vec::with_capacity(pre_end + vl.len());
                ans.extend_from_slice(&l.as_slice()[..pre_end]);
                ans.extend(vl.iter().cloned());
                ans.extend_from_slice(&l.as_slice()[post_start..]);
                Ok(v_list(ans))
            }
            _ => unreachable!(),
        }
    }

    /// The value of `$` inside an index expression over this value.
    pub fn index_length(&self) -> Result<i64, Error> {
        match self.variant() {
            Variant::Str(s) => Ok(s.len() as i64),
            Variant::List(l) => Ok(l.len() as i64),
            _ => Err(E_TYPE),
        }
    }
}

impl Display for Var {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_literal().as_str())
    }
}

impl Debug for Var {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_literal().as_str())
    }
}

// Language-level equality: case-insensitive for strings, recursively for
// lists. Identity-level equality is `equal_strict`.
impl PartialEq<Self> for Var {
    fn eq(&self, other: &Self) -> bool {
        match (self.variant(), other.variant()) {
            (Variant::None, Variant::None) => true,
            (Variant::Int(l), Variant::Int(r)) => l == r,
            (Variant::Float(l), Variant::Float(r)) => l == r,
            (Variant::Str(l), Variant::Str(r)) => l == r,
            (Variant::Obj(l), Variant::Obj(r)) => l == r,
            (Variant::Err(l), Variant::Err(r)) => l == r,
            (Variant::List(l), Variant::List(r)) => l == r,
            (_, _) => false,
        }
    }
}

impl Eq for Var {}

impl PartialOrd<Self> for Var {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Total order across types for container purposes only; the language-level
// comparison operators go through `compare` and reject mixed types.
impl Ord for Var {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.variant(), other.variant()) {
            (Variant::Int(l), Variant::Int(r)) => l.cmp(r),
            (Variant::Float(l), Variant::Float(r)) => R64::from(*l).cmp(&R64::from(*r)),
            (Variant::Str(l), Variant::Str(r)) => l.cmp(r),
            (Variant::Obj(l), Variant::Obj(r)) => l.cmp(r),
            (Variant::Err(l), Variant::Err(r)) => l.cmp(r),
            (Variant::List(l), Variant::List(r)) => l.cmp(r),
            (l, r) => type_rank(l).cmp(&type_rank(r)),
        }
    }
}

fn type_rank(v: &Variant) -> u8 {
    match v {
        Variant::None => 0,
        Variant::Int(_) => 1,
        Variant::Float(_) => 2,
        Variant::Str(_) => 3,
        Variant::Obj(_) => 4,
        Variant::Err(_) => 5,
        Variant::List(_) => 6,
    }
}

impl Hash for Var {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let t = self.type_id() as u8;
        t.hash(state);
        match self.variant() {
            Variant::None => {}
            Variant::Int(i) => i.hash(state),
            Variant::Float(f) => R64::from(*f).hash(state),
            Variant::Str(s) => s.hash(state),
            Variant::Obj(o) => o.hash(state),
            Variant::Err(e) => e.hash(state),
            Variant::List(l) => l.hash(state),
        }
    }
}

impl From<&str> for Var {
    fn from(s: &str) -> Self {
        v_str(s)
    }
}

impl From<String> for Var {
    fn from(s: String) -> Self {
        v_string(s)
    }
}

impl From<i64> for Var {
    fn from(i: i64) -> Self {
        v_int(i)
    }
}

impl From<f64> for Var {
    fn from(f: f64) -> Self {
        v_float(f)
    }
}

impl From<Objid> for Var {
    fn from(o: Objid) -> Self {
        v_objid(o)
    }
}

impl From<Vec<Self>> for Var {
    fn from(l: Vec<Self>) -> Self {
        v_list(l)
    }
}

impl From<Error> for Var {
    fn from(e: Error) -> Self {
        v_err(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add() {
        assert_eq!(v_int(1).add(&v_int(2)), Ok(v_int(3)));
        assert_eq!(v_float(1.).add(&v_float(2.)), Ok(v_float(3.)));
        assert_eq!(v_str("foo").add(&v_str("bar")), Ok(v_str("foobar")));
        // arithmetic does not coerce across numeric types
        assert_eq!(v_int(1).add(&v_float(2.0)), Err(E_TYPE));
        assert_eq!(v_int(1).add(&v_str("x")), Err(E_TYPE));
    }

    #[test]
    fn test_div_edges() {
        assert_eq!(v_int(7).div(&v_int(2)), Ok(v_int(3)));
        assert_eq!(v_int(1).div(&v_int(0)), Err(E_DIV));
        assert_eq!(v_int(i64::MIN).div(&v_int(-1)), Ok(v_int(i64::MIN)));
        assert_eq!(v_float(1.).div(&v_float(0.)), Err(E_DIV));
        assert_eq!(v_int(1).modulus(&v_int(0)), Err(E_DIV));
        assert_eq!(v_int(i64::MIN).modulus(&v_int(-1)), Ok(v_int(0)));
    }

    #[test]
    fn test_float_overflow() {
        assert_eq!(v_float(f64::MAX).mul(&v_float(2.0)), Err(E_FLOAT));
        assert_eq!(v_float(0.0).div(&v_float(0.0)), Err(E_DIV));
    }

    #[test]
    fn test_pow() {
        assert_eq!(v_int(2).pow(&v_int(10)), Ok(v_int(1024)));
        assert_eq!(v_int(0).pow(&v_int(-1)), Err(E_DIV));
        assert_eq!(v_int(1).pow(&v_int(-5)), Ok(v_int(1)));
        assert_eq!(v_int(-1).pow(&v_int(-3)), Ok(v_int(-1)));
        assert_eq!(v_int(-1).pow(&v_int(-4)), Ok(v_int(1)));
        assert_eq!(v_int(2).pow(&v_int(-2)), Ok(v_int(0)));
        assert_eq!(v_float(2.).pow(&v_float(2.)), Ok(v_float(4.)));
    }

    #[test]
    fn test_equality_levels() {
        // language-level equality folds case, recursively
        assert_eq!(v_str("Foo"), v_str("FOO"));
        assert_eq!(
            v_list(vec![v_str("Foo")]),
            v_list(vec![v_str("foo")])
        );
        // identity-level does not
        assert!(!v_str("Foo").equal_strict(&v_str("FOO")));
        assert!(v_str("Foo").equal_strict(&v_str("Foo")));
        assert!(!v_list(vec![v_str("Foo")]).equal_strict(&v_list(vec![v_str("foo")])));
    }

    #[test]
    fn test_in_folds_case() {
        let l = v_list(vec![v_str("foo")]);
        assert_eq!(l.index_in(&v_str("Foo")), Ok(v_int(1)));
        assert_eq!(l.index_in(&v_str("bar")), Ok(v_int(0)));
    }

    #[test]
    fn test_compare_mixed_types() {
        assert!(v_int(1).compare(&v_int(2)).is_ok());
        assert_eq!(v_int(1).compare(&v_float(2.0)), Err(E_TYPE));
        assert_eq!(
            v_list(vec![]).compare(&v_list(vec![])),
            Err(E_TYPE)
        );
    }

    #[test]
    fn test_is_true() {
        assert!(v_int(1).is_true());
        assert!(!v_int(0).is_true());
        assert!(v_float(0.5).is_true());
        assert!(v_str("a").is_true());
        assert!(!v_str("").is_true());
        assert!(v_list(vec![v_int(1)]).is_true());
        assert!(!v_empty_list().is_true());
        assert!(!v_obj(1).is_true());
        assert!(!v_err(E_TYPE).is_true());
    }

    #[test]
    fn test_range() {
        let l = v_list(vec![v_int(1), v_int(2), v_int(3), v_int(4), v_int(5)]);
        assert_eq!(
            l.range(2, 4),
            Ok(v_list(vec![v_int(2), v_int(3), v_int(4)]))
        );
        assert_eq!(v_str("hello world").range(2, 7), Ok(v_str("ello w")));
        // end < start is the empty splice, not an error
        assert_eq!(v_empty_list().range(1, 0), Ok(v_empty_list()));
        assert_eq!(l.range(2, 7), Err(E_RANGE));
        assert_eq!(v_int(10).range(1, 5), Err(E_TYPE));
    }

    #[test]
    fn test_rangeset() {
        let base = v_list(vec![v_int(1), v_int(2), v_int(3), v_int(4)]);
        let value = v_list(vec![v_str("a"), v_str("b")]);
        assert_eq!(
            base.rangeset(value, 2, 3),
            Ok(v_list(vec![v_int(1), v_str("a"), v_str("b"), v_int(4)]))
        );
        // string splice: "foo"[2..2] = "LA" => "fLAo"
        assert_eq!(
            v_str("foo").rangeset(v_str("LA"), 2, 2),
            Ok(v_str("fLAo"))
        );
        // empty splice inserts before `from`
        assert_eq!(
            v_str("foo").rangeset(v_str("X"), 2, 1),
            Ok(v_str("fXoo"))
        );
        assert_eq!(
            v_str("abcdef").rangeset(v_str("ghi"), 0, 3),
            Err(E_RANGE)
        );
        assert_eq!(
            v_str("abcdef").rangeset(v_str("ghi"), 2, 7),
            Err(E_RANGE)
        );
    }

    #[test]
    fn test_assoc() {
        let alist = v_list(vec![
            v_list(vec![v_str("name"), v_str("thing")]),
            v_list(vec![v_str("size"), v_int(3)]),
        ]);
        assert_eq!(
            alist.assoc_get(&Str::from_str("Size")),
            Ok(v_int(3))
        );
        assert_eq!(
            alist.assoc_get(&Str::from_str("missing")),
            Err(E_RANGE)
        );
        let updated = alist.assoc_set(&Str::from_str("size"), &v_int(9)).unwrap();
        assert_eq!(updated.assoc_get(&Str::from_str("size")), Ok(v_int(9)));
        // malformed association shape
        assert_eq!(
            v_list(vec![v_int(1)]).assoc_get(&Str::from_str("x")),
            Err(E_TYPE)
        );
    }
}
