//! The process-wide world: the store, the connection registry, the listener
//! table, the option snapshot and the shutdown signal. Created once at
//! startup and passed by reference; never a global.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use loam_values::var::objid::Objid;
use loam_values::var::{Symbol, Variant};
use loam_values::SYSTEM_OBJECT;

use crate::config::ServerOptions;
use crate::db::{Db, WorldSnapshot};
use crate::tasks::connections::ConnectionRegistry;

/// One configured network endpoint and the object whose verbs implement its
/// login and disconnect policy.
#[derive(Debug, Clone)]
pub struct Listener {
    pub object: Objid,
    pub endpoint: String,
    pub print_messages: bool,
}

/// Where checkpoint images go. The concrete file format lives with the host;
/// the kernel only produces the image.
pub trait SnapshotSink: Send + Sync {
    fn write_snapshot(&self, snapshot: WorldSnapshot) -> Result<(), anyhow::Error>;
}

pub struct World {
    pub db: Arc<Db>,
    pub connections: ConnectionRegistry,
    pub listeners: Mutex<HashMap<String, Listener>>,
    options: RwLock<Arc<ServerOptions>>,
    shutdown: AtomicBool,
    shutdown_tx: Mutex<Option<flume::Sender<Option<String>>>>,
    pub snapshot_sink: Mutex<Option<Box<dyn SnapshotSink>>>,
}

impl World {
    #[must_use]
    pub fn new(db: Arc<Db>) -> Arc<Self> {
        Arc::new(Self {
            db,
            connections: ConnectionRegistry::new(),
            listeners: Mutex::new(HashMap::new()),
            options: RwLock::new(Arc::new(ServerOptions::default())),
            shutdown: AtomicBool::new(false),
            shutdown_tx: Mutex::new(None),
            snapshot_sink: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn options(&self) -> Arc<ServerOptions> {
        self.options.read().clone()
    }

    pub fn set_options(&self, options: ServerOptions) {
        *self.options.write() = Arc::new(options);
    }

    /// Refresh the option snapshot from `#0.server_options`.
    pub fn reload_options(&self) {
        let mut tx = self.db.begin_tx();
        let options = ServerOptions::load(&mut tx);
        tx.rollback();
        self.set_options(options);
        info!("server options reloaded");
    }

    /// Register the channel the host listens on for a shutdown request.
    pub fn set_shutdown_channel(&self, tx: flume::Sender<Option<String>>) {
        *self.shutdown_tx.lock() = Some(tx);
    }

    pub fn request_shutdown(&self, message: Option<String>) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(tx) = self.shutdown_tx.lock().as_ref() {
            let _ = tx.send(message);
        }
    }

    #[must_use]
    pub fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// A `boot_msg`-style message off `#0`: a string, or list of strings,
    /// rendered to lines.
    #[must_use]
    pub fn system_message(&self, name: &str) -> Vec<String> {
        let mut tx = self.db.begin_tx();
        let result = tx.raw_property(SYSTEM_OBJECT, &Symbol::mk(name));
        let lines = match result {
            Ok(v) => match v.variant() {
                Variant::Str(s) => vec![s.as_str().to_string()],
                Variant::List(l) => l
                    .iter()
                    .filter_map(|e| match e.variant() {
                        Variant::Str(s) => Some(s.as_str().to_string()),
                        _ => None,
                    })
                    .collect(),
                _ => vec![],
            },
            Err(_) => vec![],
        };
        tx.rollback();
        lines
    }
}
