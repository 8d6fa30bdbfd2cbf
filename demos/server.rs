use std::env;

use log::info;
use tokio::signal;

use finesse::{FinesseConfig, FinesseServer};

#[tokio::main]
async fn main() {
    env_logger::init();

    let mountpoint = env::args_os().nth(1).unwrap_or_else(|| "/tmp".into());
    let file_system_size = 256 << 20;
    let filesystem = finesse::memory::new(file_system_size);

    let config = FinesseConfig::from_env();
    let server = FinesseServer::start(filesystem, mountpoint.as_ref(), config).expect("failed to start Finesse server");
    info!("Finesse demo server running against embedded MemoryFS at {:?}", mountpoint);

    signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    info!("received ctrl-c, shutting down");
    server.shutdown();
}
