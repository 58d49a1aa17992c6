use loam_values::model::r#match::{match_preposition, ArgSpec, PrepSpec, VerbArgsSpec};
use loam_values::util::parse_into_words;
use loam_values::var::objid::Objid;
use loam_values::var::{v_str, Var};
use loam_values::NOTHING;

use crate::matching::MatchEnv;

/// The result of parsing one command line: the verb word, the raw and
/// split argument forms, and the resolved direct/indirect objects.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedCommand {
    pub verb: String,
    pub argstr: String,
    pub args: Vec<Var>,

    pub dobjstr: String,
    pub dobj: Objid,

    pub prepstr: String,
    pub prep: PrepSpec,

    pub iobjstr: String,
    pub iobj: Objid,
}

impl ParsedCommand {
    /// The concrete argument spec this parse presents for verb matching,
    /// relative to a candidate `this`.
    #[must_use]
    pub fn args_spec(&self, this: Objid) -> VerbArgsSpec {
        let objspec = |o: Objid| {
            if o == this {
                ArgSpec::This
            } else if o == NOTHING {
                ArgSpec::None
            } else {
                ArgSpec::Any
            }
        };
        VerbArgsSpec {
            dobj: objspec(self.dobj),
            prep: self.prep,
            iobj: objspec(self.iobj),
        }
    }
}

/// Parse a command line: rewrite the say/emote/eval shorthands, split words,
/// find the preposition, and resolve the object strings through `matcher`.
pub fn parse_command<M: MatchEnv>(input: &str, matcher: &mut M) -> Option<ParsedCommand> {
    // Initial-character shorthands expand to their verb forms.
    let mut command = input.trim_start().to_string();
    match command.chars().next() {
        Some('"') => command.replace_range(..1, "say "),
        Some(':') => command.replace_range(..1, "emote "),
        Some(';') => command.replace_range(..1, "eval "),
        _ => {}
    };

    let mut parts = command.splitn(2, char::is_whitespace);
    let verb = parts.next()?.to_string();
    if verb.is_empty() {
        return None;
    }
    let argstr = parts.next().unwrap_or_default().to_string();
    let words = parse_into_words(&argstr);

    // Find the first preposition; everything before is the direct object
    // phrase, everything after the indirect.
    let mut prepstr = String::new();
    let mut prep = PrepSpec::None;
    let mut prep_index = None;
    for (j, word) in words.iter().enumerate() {
        if let Some(p) = match_preposition(word) {
            prep_index = Some(j);
            prepstr = word.to_string();
            prep = PrepSpec::Other(p.id);
            break;
        }
    }

    let (dobjstr, iobjstr) = match prep_index {
        Some(j) => (words[0..j].join(" "), words[j + 1..].join(" ")),
        None => (words.join(" "), String::new()),
    };

    let dobj = if dobjstr.is_empty() {
        NOTHING
    } else {
        matcher.match_object(&dobjstr)
    };
    let iobj = if iobjstr.is_empty() {
        NOTHING
    } else {
        matcher.match_object(&iobjstr)
    };

    let args: Vec<Var> = words.iter().map(|w| v_str(w)).collect();

    Some(ParsedCommand {
        verb,
        argstr,
        args,
        dobjstr,
        dobj,
        prepstr,
        prep,
        iobjstr,
        iobj,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticMatcher;
    impl MatchEnv for StaticMatcher {
        fn match_object(&mut self, name: &str) -> Objid {
            match name {
                "ball" => Objid(1),
                "box" => Objid(2),
                _ => loam_values::FAILED_MATCH,
            }
        }
    }

    #[test]
    fn test_bare_verb() {
        let pc = parse_command("look", &mut StaticMatcher).unwrap();
        assert_eq!(pc.verb, "look");
        assert_eq!(pc.argstr, "");
        assert_eq!(pc.dobj, NOTHING);
        assert_eq!(pc.prep, PrepSpec::None);
    }

    #[test]
    fn test_dobj_only() {
        let pc = parse_command("get ball", &mut StaticMatcher).unwrap();
        assert_eq!(pc.verb, "get");
        assert_eq!(pc.dobjstr, "ball");
        assert_eq!(pc.dobj, Objid(1));
        assert_eq!(pc.args, vec![v_str("ball")]);
    }

    #[test]
    fn test_prep_splits_phrases() {
        let pc = parse_command("put ball in box", &mut StaticMatcher).unwrap();
        assert_eq!(pc.verb, "put");
        assert_eq!(pc.dobjstr, "ball");
        assert_eq!(pc.dobj, Objid(1));
        assert_eq!(pc.prepstr, "in");
        assert_eq!(pc.prep, PrepSpec::Other(3));
        assert_eq!(pc.iobjstr, "box");
        assert_eq!(pc.iobj, Objid(2));
    }

    #[test]
    fn test_say_shorthand() {
        let pc = parse_command("\"hello there", &mut StaticMatcher).unwrap();
        assert_eq!(pc.verb, "say");
        assert_eq!(pc.argstr, "hello there");
        assert_eq!(pc.args, vec![v_str("hello"), v_str("there")]);
    }

    #[test]
    fn test_emote_and_eval_shorthands() {
        assert_eq!(
            parse_command(":waves", &mut StaticMatcher).unwrap().verb,
            "emote"
        );
        assert_eq!(
            parse_command(";1 + 1", &mut StaticMatcher).unwrap().verb,
            "eval"
        );
    }

    #[test]
    fn test_quoted_arg() {
        let pc = parse_command("announce \"big news\"", &mut StaticMatcher).unwrap();
        assert_eq!(pc.args, vec![v_str("big news")]);
        assert_eq!(pc.argstr, "\"big news\"");
    }

    #[test]
    fn test_empty_line() {
        assert!(parse_command("", &mut StaticMatcher).is_none());
        assert!(parse_command("   ", &mut StaticMatcher).is_none());
    }
}
