//! The in-memory, transactional object store. The committed state is a
//! versioned map of objects; each task works against a snapshot taken at
//! transaction start and publishes its writes atomically at commit, with
//! optimistic conflict detection per touched object.

pub mod loader;
pub mod objects;
pub mod tx;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bincode::{Decode, Encode};
use parking_lot::Mutex;
use tracing::trace;

use loam_values::model::CommitResult;
use loam_values::var::objid::Objid;

use crate::db::objects::Object;
use crate::db::tx::WorldTx;

#[derive(Clone)]
pub(crate) struct CommittedSlot {
    pub version: u64,
    pub obj: Arc<Object>,
}

pub(crate) struct Committed {
    pub version: u64,
    pub objects: HashMap<Objid, CommittedSlot>,
    pub players: HashSet<Objid>,
    pub players_version: u64,
    pub next_objid: i64,
}

/// The store itself. Tasks never hold the lock while running; it is taken
/// briefly at transaction start (to snapshot) and at commit (to validate and
/// install).
pub struct Db {
    pub(crate) inner: Mutex<Committed>,
}

/// A deep, serializable image of the persistent world: all objects, the
/// player set, and the id watermark. How this is written out (and read back
/// by the loader) is up to the host.
#[derive(Clone, Encode, Decode)]
pub struct WorldSnapshot {
    pub objects: Vec<Object>,
    pub players: Vec<Objid>,
    pub next_objid: i64,
}

impl Db {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Committed {
                version: 0,
                objects: HashMap::new(),
                players: HashSet::new(),
                players_version: 0,
                next_objid: 0,
            }),
        })
    }

    /// Begin a transaction against the current committed state.
    #[must_use]
    pub fn begin_tx(self: &Arc<Self>) -> WorldTx {
        let inner = self.inner.lock();
        WorldTx::new(
            self.clone(),
            inner.objects.clone(),
            inner.players.clone(),
            inner.players_version,
            inner.next_objid,
        )
    }

    /// Validate a transaction's touched set and, if nothing moved underneath
    /// it, install its writes.
    pub(crate) fn commit_tx(
        &self,
        touched: &HashMap<Objid, Option<u64>>,
        writes: HashMap<Objid, Option<Arc<Object>>>,
        players: Option<(u64, HashSet<Objid>)>,
        created_from: Option<(i64, i64)>,
    ) -> CommitResult {
        let mut inner = self.inner.lock();
        for (oid, seen_version) in touched {
            let current = inner.objects.get(oid).map(|s| s.version);
            if current != *seen_version {
                trace!(?oid, "commit conflict");
                return CommitResult::ConflictRetry;
            }
        }
        if let Some((base_players_version, _)) = &players {
            if inner.players_version != *base_players_version {
                return CommitResult::ConflictRetry;
            }
        }
        if let Some((base_next, _)) = created_from {
            if inner.next_objid != base_next {
                return CommitResult::ConflictRetry;
            }
        }

        if writes.is_empty() && players.is_none() && created_from.is_none() {
            return CommitResult::Success;
        }

        let version = inner.version + 1;
        inner.version = version;
        for (oid, write) in writes {
            match write {
                Some(obj) => {
                    inner.objects.insert(oid, CommittedSlot { version, obj });
                }
                None => {
                    inner.objects.remove(&oid);
                }
            }
        }
        if let Some((_, new_players)) = players {
            inner.players = new_players;
            inner.players_version = version;
        }
        if let Some((_, new_next)) = created_from {
            inner.next_objid = new_next;
        }
        CommitResult::Success
    }

    /// Produce a serializable image of the committed world.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        let inner = self.inner.lock();
        let mut objects: Vec<Object> = inner
            .objects
            .values()
            .map(|s| s.obj.as_ref().clone())
            .collect();
        objects.sort_by_key(|o| o.id.0);
        let mut players: Vec<Objid> = inner.players.iter().copied().collect();
        players.sort();
        WorldSnapshot {
            objects,
            players,
            next_objid: inner.next_objid,
        }
    }

    /// Replace the committed state wholesale from a snapshot. Intended for
    /// the external loader at startup, before any tasks run.
    pub fn restore(&self, snapshot: WorldSnapshot) {
        let mut inner = self.inner.lock();
        inner.version += 1;
        let version = inner.version;
        inner.objects = snapshot
            .objects
            .into_iter()
            .map(|o| {
                (
                    o.id,
                    CommittedSlot {
                        version,
                        obj: Arc::new(o),
                    },
                )
            })
            .collect();
        inner.players = snapshot.players.into_iter().collect();
        inner.players_version = version;
        inner.next_objid = snapshot.next_objid;
    }
}
