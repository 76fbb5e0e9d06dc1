//! Stable per-sensor uid assignment.
use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::types::DeviceId;

#[derive(Default)]
struct RegistryInner {
    counter: u32,
    map: HashMap<DeviceId, HashMap<String, u32>>,
}

/// Process-wide `(device_id, sensor_name) -> uid` map. Uids are monotonic
/// from 1 and never reused for a different pair while the process lives.
#[derive(Default)]
pub struct UidRegistry {
    inner: Mutex<RegistryInner>,
}

impl UidRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Return the uid for `(id, name)`, assigning the next one on first sight.
    pub fn uid_for(&self, id: DeviceId, name: &str) -> u32 {
        let mut inner = self.inner.lock();
        if let Some(&uid) = inner.map.get(&id).and_then(|sensors| sensors.get(name)) {
            return uid;
        }
        inner.counter += 1;
        let uid = inner.counter;
        inner.map.entry(id).or_default().insert(name.to_string(), uid);
        debug!("assigned uid {uid} to {id}/{name}");
        uid
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every assignment; meant for tests that reuse one registry.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.counter = 0;
        inner.map.clear();
    }
}
