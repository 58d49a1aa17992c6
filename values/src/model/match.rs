use bincode::{Decode, Encode};
use lazy_static::lazy_static;

/// The direct/indirect object specification on a verb.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Encode, Decode)]
pub enum ArgSpec {
    None = 0,
    Any = 1,
    This = 2,
}

impl ArgSpec {
    #[must_use]
    pub fn to_string(&self) -> &str {
        match self {
            ArgSpec::None => "none",
            ArgSpec::Any => "any",
            ArgSpec::This => "this",
        }
    }

    #[must_use]
    pub fn from_string(repr: &str) -> Option<ArgSpec> {
        match repr {
            "none" => Some(ArgSpec::None),
            "any" => Some(ArgSpec::Any),
            "this" => Some(ArgSpec::This),
            _ => None,
        }
    }
}

/// The preposition specification on a verb: a concrete preposition group
/// (an offset into [`PREP_LIST`]), any, or none.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Encode, Decode)]
pub enum PrepSpec {
    Any,
    None,
    Other(u16),
}

/// The full (dobj, prep, iobj) matching spec on a verb.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Encode, Decode)]
pub struct VerbArgsSpec {
    pub dobj: ArgSpec,
    pub prep: PrepSpec,
    pub iobj: ArgSpec,
}

impl VerbArgsSpec {
    #[must_use]
    pub fn this_none_this() -> Self {
        VerbArgsSpec {
            dobj: ArgSpec::This,
            prep: PrepSpec::None,
            iobj: ArgSpec::This,
        }
    }

    /// Whether this spec admits the concrete parse `v`.
    #[must_use]
    pub fn matches(&self, v: &Self) -> bool {
        (self.dobj == ArgSpec::Any || self.dobj == v.dobj)
            && (self.prep == PrepSpec::Any || self.prep == v.prep)
            && (self.iobj == ArgSpec::Any || self.iobj == v.iobj)
    }
}

/// The fixed preposition groups; alternatives within a group are separated
/// by `/`.
pub const PREP_LIST: [&str; 15] = [
    "with/using",
    "at/to",
    "in front of",
    "in/inside/into",
    "on top of/on/onto/upon",
    "out of/from inside/from",
    "over",
    "through",
    "under/underneath/beneath",
    "behind",
    "beside",
    "for/about",
    "is",
    "as",
    "off/off of",
];

#[derive(Clone)]
pub struct Prep {
    pub id: u16,
    phrases: Vec<&'static str>,
}

lazy_static! {
    static ref PREPOSITIONS: Vec<Prep> = {
        PREP_LIST
            .iter()
            .enumerate()
            .map(|(id, phrase)| {
                let phrases = phrase
                    .split('/')
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<&str>>();
                Prep {
                    id: id as u16,
                    phrases,
                }
            })
            .collect::<Vec<Prep>>()
    };
}

/// Find the preposition group containing `prep`, either as one of its
/// phrases or as a numeric group id (optionally `#`-prefixed).
#[must_use]
pub fn match_preposition(prep: &str) -> Option<Prep> {
    let numeric = prep.strip_prefix('#').unwrap_or(prep);
    if let Ok(id) = numeric.parse::<usize>() {
        return PREPOSITIONS.get(id).cloned();
    }
    PREPOSITIONS
        .iter()
        .find(|p| p.phrases.iter().any(|t| t.eq_ignore_ascii_case(prep)))
        .cloned()
}

#[must_use]
pub fn parse_preposition_spec(repr: &str) -> Option<PrepSpec> {
    match repr {
        "any" => Some(PrepSpec::Any),
        "none" => Some(PrepSpec::None),
        _ => match_preposition(repr).map(|p| PrepSpec::Other(p.id)),
    }
}

#[must_use]
pub fn preposition_to_string(ps: &PrepSpec) -> &'static str {
    match ps {
        PrepSpec::Any => "any",
        PrepSpec::None => "none",
        PrepSpec::Other(id) => PREP_LIST.get(*id as usize).copied().unwrap_or("none"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_preposition() {
        assert_eq!(match_preposition("with").map(|p| p.id), Some(0));
        assert_eq!(match_preposition("using").map(|p| p.id), Some(0));
        assert_eq!(match_preposition("to").map(|p| p.id), Some(1));
        assert_eq!(match_preposition("in front of").map(|p| p.id), Some(2));
        assert_eq!(match_preposition("#7").map(|p| p.id), Some(7));
        assert!(match_preposition("zorp").is_none());
    }

    #[test]
    fn test_args_spec_matching() {
        let spec = VerbArgsSpec {
            dobj: ArgSpec::Any,
            prep: PrepSpec::Other(1),
            iobj: ArgSpec::This,
        };
        let parsed = VerbArgsSpec {
            dobj: ArgSpec::None,
            prep: PrepSpec::Other(1),
            iobj: ArgSpec::This,
        };
        assert!(spec.matches(&parsed));
        let wrong_prep = VerbArgsSpec {
            prep: PrepSpec::Other(2),
            ..parsed
        };
        assert!(!spec.matches(&wrong_prep));
    }

    #[test]
    fn test_spec_strings() {
        assert_eq!(parse_preposition_spec("any"), Some(PrepSpec::Any));
        assert_eq!(parse_preposition_spec("none"), Some(PrepSpec::None));
        assert_eq!(
            parse_preposition_spec("under"),
            Some(PrepSpec::Other(8))
        );
        assert_eq!(
            preposition_to_string(&PrepSpec::Other(8)),
            "under/underneath/beneath"
        );
    }
}
