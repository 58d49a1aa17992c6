//! Object matching for command parsing: resolving "the ball" typed by a
//! player to an object id by searching what they hold and where they stand.

use loam_values::var::objid::Objid;
use loam_values::{AMBIGUOUS, FAILED_MATCH, NOTHING};

use crate::db::tx::WorldTx;

/// Resolves an object phrase to an id. `#-2` means ambiguous, `#-3` no
/// match.
pub trait MatchEnv {
    fn match_object(&mut self, name: &str) -> Objid;
}

/// Matching against the world as seen by one player: themselves, their
/// inventory, their location, and its contents.
pub struct WsMatchEnv<'a> {
    pub tx: &'a mut WorldTx,
    pub player: Objid,
}

enum MatchQuality {
    Exact,
    Prefix,
}

fn name_matches(name: &str, candidate: &str) -> Option<MatchQuality> {
    if candidate.eq_ignore_ascii_case(name) {
        return Some(MatchQuality::Exact);
    }
    let cl = candidate.to_ascii_lowercase();
    let nl = name.to_ascii_lowercase();
    if cl.starts_with(&nl) && !name.is_empty() {
        return Some(MatchQuality::Prefix);
    }
    None
}

impl MatchEnv for WsMatchEnv<'_> {
    fn match_object(&mut self, name: &str) -> Objid {
        if name.is_empty() {
            return FAILED_MATCH;
        }
        if let Some(num) = name.strip_prefix('#') {
            if let Ok(id) = num.parse::<i64>() {
                return Objid(id);
            }
        }
        if name.eq_ignore_ascii_case("me") {
            return self.player;
        }
        if name.eq_ignore_ascii_case("here") {
            return self.tx.location_of(self.player).unwrap_or(NOTHING);
        }

        let mut search = vec![self.player];
        search.extend(self.tx.contents_of(self.player).unwrap_or_default());
        if let Ok(loc) = self.tx.location_of(self.player) {
            if loc != NOTHING {
                search.push(loc);
                search.extend(self.tx.contents_of(loc).unwrap_or_default());
            }
        }

        let mut exact = None;
        let mut prefix_matches = vec![];
        for oid in search {
            if !self.tx.valid(oid) {
                continue;
            }
            let Ok((oname, aliases)) = self.tx.names_of(oid) else {
                continue;
            };
            let mut best: Option<MatchQuality> = None;
            for candidate in std::iter::once(&oname).chain(aliases.iter()) {
                match name_matches(name, candidate) {
                    Some(MatchQuality::Exact) => {
                        best = Some(MatchQuality::Exact);
                        break;
                    }
                    Some(MatchQuality::Prefix) => {
                        if best.is_none() {
                            best = Some(MatchQuality::Prefix);
                        }
                    }
                    None => {}
                }
            }
            match best {
                Some(MatchQuality::Exact) => {
                    if exact.is_none() {
                        exact = Some(oid);
                    }
                }
                Some(MatchQuality::Prefix) => prefix_matches.push(oid),
                None => {}
            }
        }

        if let Some(oid) = exact {
            return oid;
        }
        match prefix_matches.len() {
            0 => FAILED_MATCH,
            1 => prefix_matches[0],
            _ => AMBIGUOUS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::loader::Loader;
    use crate::db::Db;
    use loam_values::model::props::PropFlag;
    use loam_values::util::BitEnum;
    use loam_values::var::{v_list, v_str};

    fn setup() -> (std::sync::Arc<Db>, Objid) {
        let db = Db::new();
        let mut loader = Loader::new(db.clone());
        let room = loader.create_object(Objid(0), "The Square", Objid(2));
        let player = loader.create_object(Objid(2), "Frobisher", Objid(2));
        let ball = loader.create_object(Objid(3), "rubber ball", Objid(2));
        let bat = loader.create_object(Objid(4), "bat", Objid(2));
        loader
            .define_property(
                bat,
                "aliases",
                Objid(2),
                BitEnum::new_with(PropFlag::Read),
                v_list(vec![v_str("cricket bat"), v_str("willow")]),
            )
            .unwrap();
        loader.set_location(player, room).unwrap();
        loader.set_location(ball, player).unwrap();
        loader.set_location(bat, room).unwrap();
        loader.commit().unwrap();
        (db, player)
    }

    #[test]
    fn test_literal_me_here() {
        let (db, player) = setup();
        let mut tx = db.begin_tx();
        let mut env = WsMatchEnv {
            tx: &mut tx,
            player,
        };
        assert_eq!(env.match_object("me"), player);
        assert_eq!(env.match_object("here"), Objid(0));
        assert_eq!(env.match_object("#3"), Objid(3));
    }

    #[test]
    fn test_exact_beats_prefix_and_ambiguity() {
        let (db, player) = setup();
        let mut tx = db.begin_tx();
        let mut env = WsMatchEnv {
            tx: &mut tx,
            player,
        };
        // inventory item by prefix
        assert_eq!(env.match_object("rubber"), Objid(3));
        // alias match
        assert_eq!(env.match_object("willow"), Objid(4));
        // exact name wins over alias prefix
        assert_eq!(env.match_object("bat"), Objid(4));
        // no match at all
        assert_eq!(env.match_object("zeppelin"), FAILED_MATCH);
    }
}
