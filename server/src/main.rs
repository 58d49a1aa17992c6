mod bootstrap;
mod host;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use loam_kernel::db::Db;
use loam_kernel::tasks::scheduler::Scheduler;
use loam_kernel::world::{Listener, World};
use loam_values::SYSTEM_OBJECT;

use crate::host::tcp::{run_until_shutdown, TcpHost};

#[derive(Parser, Debug)]
#[command(name = "loam", about = "A multi-user, programmable world server.")]
struct Args {
    /// Address to accept player connections on.
    #[arg(long, default_value = "0.0.0.0:7777")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let db = Db::new();
    bootstrap::bootstrap(db.clone())?;
    let world = World::new(db);
    world.reload_options();
    world.listeners.lock().insert(
        args.listen.port().to_string(),
        Listener {
            object: SYSTEM_OBJECT,
            endpoint: args.listen.to_string(),
            print_messages: true,
        },
    );

    let (shutdown_tx, shutdown_rx) = flume::unbounded();
    world.set_shutdown_channel(shutdown_tx);

    let scheduler = Scheduler::new(world.clone());
    scheduler.start();

    // The startup hook runs before the listener opens.
    let _ = scheduler.submit_verb_task(
        SYSTEM_OBJECT,
        SYSTEM_OBJECT,
        "server_started",
        vec![],
        "",
        SYSTEM_OBJECT,
        SYSTEM_OBJECT,
        None,
    );

    let host = TcpHost::bind(args.listen, world.clone(), scheduler.clone(), SYSTEM_OBJECT)
        .await?;
    run_until_shutdown(host, shutdown_rx).await;

    // Drain connections with the boot message, then leave; the scheduler's
    // own loop aborts outstanding tasks once the shutdown flag is up.
    world.request_shutdown(None);
    for who in world.connections.connected(true) {
        if let Some(conn) = world.connections.get(who) {
            for line in world.system_message("boot_msg") {
                conn.send_text(line);
            }
            conn.output.close();
        }
    }
    info!("server stopped");
    Ok(())
}
