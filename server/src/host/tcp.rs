//! The TCP accept loop: one listening socket, one `serve_connection` per
//! accepted stream.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use loam_kernel::tasks::scheduler::Scheduler;
use loam_kernel::world::World;
use loam_values::var::objid::Objid;

pub struct TcpHost {
    listener: TcpListener,
    world: Arc<World>,
    scheduler: Arc<Scheduler>,
    listener_object: Objid,
}

impl TcpHost {
    pub async fn bind(
        addr: SocketAddr,
        world: Arc<World>,
        scheduler: Arc<Scheduler>,
        listener_object: Objid,
    ) -> Result<Self, anyhow::Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            world,
            scheduler,
            listener_object,
        })
    }

    pub async fn run(&self) -> Result<(), anyhow::Error> {
        info!("listening on {:?}", self.listener.local_addr()?);
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            if self.world.shutting_down() {
                return Ok(());
            }
            stream.set_nodelay(true).ok();
            let local_port = self
                .listener
                .local_addr()
                .map(|a| a.port())
                .unwrap_or_default();
            let peer_name = format!(
                "port {} from {}, port {}",
                local_port,
                peer_addr.ip(),
                peer_addr.port()
            );
            let world = self.world.clone();
            let scheduler = self.scheduler.clone();
            let listener_object = self.listener_object;
            tokio::spawn(async move {
                super::connection::serve_connection(
                    world,
                    scheduler,
                    listener_object,
                    stream,
                    peer_name,
                )
                .await;
            });
        }
    }
}

pub async fn run_until_shutdown(
    host: TcpHost,
    shutdown_rx: flume::Receiver<Option<String>>,
) {
    tokio::select! {
        result = host.run() => {
            if let Err(e) = result {
                error!(error = ?e, "accept loop failed");
            }
        }
        message = shutdown_rx.recv_async() => {
            let message = message.ok().flatten();
            info!(?message, "shutdown requested");
        }
    }
}
