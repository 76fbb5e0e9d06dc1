//! Driver lifecycle management and the read surface over the current caches.
//!
//! Mutating operations (create/stop/select) serialize through one async lock.
//! Readers never take that lock: they go straight to the selected cache
//! pair's own mutexes and receive deep snapshots.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::{error, info};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::cache::{StaticCache, StaticEntry, StreamCache, StreamEntry};
use crate::config::UdpConfig;
use crate::driver::UdpDriver;
use crate::error::DriverError;
use crate::net::PortPool;
use crate::registry::UidRegistry;

/// Introspection record for one driver; the shape the HTTP layer serializes.
#[derive(Debug, Clone, Serialize)]
pub struct DriverInfo {
    pub driver_id: String,
    pub ip: String,
    pub port: u16,
    pub state: String,
    pub running: bool,
    pub task_done: bool,
}

/// What a uid lookup against the current caches resolved to.
#[derive(Debug, Clone)]
pub enum CacheHit {
    Static(StaticEntry),
    Stream(StreamEntry),
}

/// Owns every driver plus the "current" cache pair the read APIs serve from.
pub struct DriverManager {
    cfg: UdpConfig,
    ports: Arc<PortPool>,
    registry: Arc<UidRegistry>,
    drivers: DashMap<String, Arc<UdpDriver>>,
    tasks: DashMap<String, JoinHandle<()>>,
    current: RwLock<Option<(Arc<StaticCache>, Arc<StreamCache>)>>,
    next_id: AtomicUsize,
    mutate: tokio::sync::Mutex<()>,
}

impl DriverManager {
    /// Registers the configured listen range with the pool as a side effect.
    pub fn new(cfg: UdpConfig, ports: Arc<PortPool>, registry: Arc<UidRegistry>) -> Self {
        ports.register_range(cfg.listen_port_range.0, cfg.listen_port_range.1);
        Self {
            cfg,
            ports,
            registry,
            drivers: DashMap::new(),
            tasks: DashMap::new(),
            current: RwLock::new(None),
            next_id: AtomicUsize::new(0),
            mutate: tokio::sync::Mutex::new(()),
        }
    }

    /// Create, bind and start a driver under a generated id. Port exhaustion
    /// and bind failures surface here.
    pub async fn create(&self) -> Result<(String, Arc<UdpDriver>), DriverError> {
        let _guard = self.mutate.lock().await;
        let driver = Arc::new(UdpDriver::new(
            self.cfg.clone(),
            Arc::clone(&self.ports),
            Arc::clone(&self.registry),
        )?);
        let socket = match driver.bind().await {
            Ok(socket) => socket,
            Err(e) => {
                // give the port back before reporting
                driver.stop();
                return Err(e);
            }
        };
        let driver_id = self.generate_id();
        let task = tokio::spawn(Arc::clone(&driver).run(socket));
        self.drivers.insert(driver_id.clone(), Arc::clone(&driver));
        self.tasks.insert(driver_id.clone(), task);
        info!("created driver {driver_id} on {}:{}", driver.ip, driver.port);
        Ok((driver_id, driver))
    }

    fn generate_id(&self) -> String {
        loop {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let driver_id = format!("udp_driver_{n}");
            if !self.drivers.contains_key(&driver_id) {
                return driver_id;
            }
        }
    }

    /// Stop one driver: cancel its receive task, tear it down, drop records.
    pub async fn stop(&self, driver_id: &str) -> Result<(), DriverError> {
        let _guard = self.mutate.lock().await;
        let (_, driver) = self
            .drivers
            .remove(driver_id)
            .ok_or_else(|| DriverError::UnknownDriver(driver_id.to_string()))?;
        if let Some((_, task)) = self.tasks.remove(driver_id) {
            task.abort();
            // wait for the receive task to drop its socket so the released
            // port is immediately bindable again
            let _ = task.await;
        }
        driver.stop();
        info!("stopped driver {driver_id}");
        Ok(())
    }

    /// Stop every driver, logging rather than propagating per-driver errors.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.drivers.iter().map(|e| e.key().clone()).collect();
        for driver_id in ids {
            if let Err(e) = self.stop(&driver_id).await {
                error!("stopping driver {driver_id} failed: {e}");
            }
        }
    }

    /// Designate one driver's caches as the pair the read APIs serve from.
    pub fn select(&self, driver_id: &str) -> Result<(), DriverError> {
        let driver = self
            .drivers
            .get(driver_id)
            .ok_or_else(|| DriverError::UnknownDriver(driver_id.to_string()))?;
        *self.current.write() = Some((driver.static_cache(), driver.stream_cache()));
        info!("selected caches of driver {driver_id}");
        Ok(())
    }

    pub fn info(&self, driver_id: &str) -> Option<DriverInfo> {
        let driver = self.drivers.get(driver_id)?;
        let task_done = self
            .tasks
            .get(driver_id)
            .map(|t| t.is_finished())
            .unwrap_or(true);
        Some(DriverInfo {
            driver_id: driver_id.to_string(),
            ip: driver.ip.clone(),
            port: driver.port,
            state: format!("{:?}", driver.state()),
            running: driver.is_running(),
            task_done,
        })
    }

    pub fn list(&self) -> Vec<DriverInfo> {
        // collect ids first so info() never re-locks the map mid-iteration
        let ids: Vec<String> = self.drivers.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter_map(|driver_id| self.info(driver_id)).collect()
    }

    /// Snapshot of every static entry in the current cache.
    pub fn list_static(&self) -> HashMap<u32, StaticEntry> {
        match self.current.read().as_ref() {
            Some((static_cache, _)) => static_cache.snapshot(),
            None => HashMap::new(),
        }
    }

    /// Snapshot of every stream descriptor in the current cache.
    pub fn list_stream(&self) -> HashMap<u32, StreamEntry> {
        match self.current.read().as_ref() {
            Some((_, stream_cache)) => stream_cache.snapshot(),
            None => HashMap::new(),
        }
    }

    /// Resolve a uid against both current caches, static first.
    pub fn get_by_uid(&self, uid: u32) -> Option<CacheHit> {
        let current = self.current.read();
        let (static_cache, stream_cache) = current.as_ref()?;
        if let Some(entry) = static_cache.get(uid) {
            return Some(CacheHit::Static(entry));
        }
        stream_cache.get(uid).map(CacheHit::Stream)
    }

    /// Advance a stream consumer's cursor by one chunk.
    pub fn next_chunk(&self, uid: u32) -> Option<Vec<u8>> {
        let current = self.current.read();
        let (_, stream_cache) = current.as_ref()?;
        stream_cache.next_chunk(uid)
    }

    /// Full reassembled payload, only once the stream is done.
    pub fn full_bytes(&self, uid: u32) -> Option<Vec<u8>> {
        let current = self.current.read();
        let (_, stream_cache) = current.as_ref()?;
        let entry = stream_cache.get(uid)?;
        if !entry.buffer.is_done() {
            return None;
        }
        Some(entry.buffer.full_bytes())
    }
}
