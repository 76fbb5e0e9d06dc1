use std::path::Path;

use anyhow::Result;
use log::info;

use telemetry_hub::config::UdpConfig;
use telemetry_hub::manager::DriverManager;
use telemetry_hub::net::PortPool;
use telemetry_hub::registry::UidRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cfg = match std::env::args().nth(1) {
        Some(path) => UdpConfig::load(Path::new(&path))?,
        None => UdpConfig::default(),
    };
    let manager = DriverManager::new(cfg, PortPool::new(), UidRegistry::new());
    let (driver_id, driver) = manager.create().await?;
    manager.select(&driver_id)?;
    info!("ingest ready on {}:{} ({driver_id})", driver.ip, driver.port);
    tokio::signal::ctrl_c().await?;
    manager.stop_all().await;
    Ok(())
}
